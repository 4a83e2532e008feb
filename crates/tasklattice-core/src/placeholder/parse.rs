//! Recursive-descent parser for the placeholder body grammar:
//!
//! ```text
//! param := IDENT "=" literal ("," meta)*
//! meta  := "domain" ":" (interval | set)
//!        | "type"   ":" IDENT
//!        | "desc"   ":" STRING
//! interval := ("(" | "[") number "," number (")" | "]")
//! set      := "{" [entry ("," entry)*] "}"   where entry := number | STRING
//! literal  := STRING | INT | FLOAT | BOOL
//! ```
//!
//! Integer literals parse as integers, floats as floats, booleans
//! case-insensitively. All failures carry the source position.

use crate::errors::{Error, Result};

use super::model::{
    is_identifier, DomainRaw, IntervalRaw, ParamName, ParamUnresolved, Placeholder, SetRaw,
    ValueLiteral,
};

/// Parse the body of one placeholder into an unresolved parameter record.
pub fn parse_param_unresolved(ph: &Placeholder) -> Result<ParamUnresolved> {
    let mut p = Parser {
        ph,
        text: ph.body(),
        pos: 0,
    };
    p.parse()
}

struct Parser<'a> {
    ph: &'a Placeholder,
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(&mut self) -> Result<ParamUnresolved> {
        self.skip_ws();
        self.expect_keyword("TL")?;
        self.skip_ws();

        let name_str = self.ident("expected parameter name")?;
        let name = ParamName::new(&name_str).map_err(|_| {
            self.error_at(self.pos - name_str.len(), format!("invalid parameter name {name_str:?}"))
        })?;

        self.skip_ws();
        self.expect_char('=')?;
        self.skip_ws();
        let default = self.literal()?;

        let mut declared_type: Option<String> = None;
        let mut domain: Option<DomainRaw> = None;
        let mut description: Option<String> = None;

        loop {
            self.skip_ws();
            if self.at_end() {
                break;
            }
            self.expect_char(',')?;
            self.skip_ws();

            let key_pos = self.pos;
            let key = self.ident("expected meta key")?;
            self.skip_ws();
            self.expect_char(':')?;
            self.skip_ws();

            match key.as_str() {
                "domain" => {
                    if domain.is_some() {
                        return Err(self.error_at(key_pos, "duplicate meta key 'domain'"));
                    }
                    domain = Some(self.domain()?);
                }
                "type" => {
                    if declared_type.is_some() {
                        return Err(self.error_at(key_pos, "duplicate meta key 'type'"));
                    }
                    declared_type = Some(self.ident("expected type name")?);
                }
                "desc" => {
                    if description.is_some() {
                        return Err(self.error_at(key_pos, "duplicate meta key 'desc'"));
                    }
                    description = Some(self.string_literal()?);
                }
                other => {
                    return Err(self.error_at(key_pos, format!("unknown meta key {other:?}")));
                }
            }
        }

        Ok(ParamUnresolved {
            name,
            default,
            declared_type,
            domain,
            description,
            placeholder: self.ph.clone(),
        })
    }

    fn domain(&mut self) -> Result<DomainRaw> {
        match self.peek() {
            Some('(' | '[') => self.interval().map(DomainRaw::Interval),
            Some('{') => self.set().map(DomainRaw::Set),
            _ => Err(self.error_here("expected interval '(..' / '[..' or set '{..' domain")),
        }
    }

    fn interval(&mut self) -> Result<IntervalRaw> {
        let lpar = self.advance().expect("caller checked bracket");
        self.skip_ws();
        let lower = self.number()?;
        self.skip_ws();
        self.expect_char(',')?;
        self.skip_ws();
        let upper = self.number()?;
        self.skip_ws();
        let rpar = match self.advance() {
            Some(c @ (')' | ']')) => c,
            _ => return Err(self.error_here("malformed interval: expected ')' or ']'")),
        };
        Ok(IntervalRaw {
            lower,
            upper,
            lpar,
            rpar,
        })
    }

    fn set(&mut self) -> Result<SetRaw> {
        self.expect_char('{')?;
        let mut entries = Vec::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.advance();
            return Ok(SetRaw { entries });
        }
        loop {
            self.skip_ws();
            let entry = match self.peek() {
                Some('"' | '\'') => ValueLiteral::Str(self.string_literal()?),
                _ => self.number()?,
            };
            entries.push(entry);
            self.skip_ws();
            match self.advance() {
                Some(',') => continue,
                Some('}') => break,
                _ => return Err(self.error_here("malformed set: expected ',' or '}'")),
            }
        }
        Ok(SetRaw { entries })
    }

    fn literal(&mut self) -> Result<ValueLiteral> {
        match self.peek() {
            Some('"' | '\'') => Ok(ValueLiteral::Str(self.string_literal()?)),
            Some(c) if c.is_ascii_digit() || c == '+' || c == '-' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let pos = self.pos;
                let word = self.ident("expected literal")?;
                match word.to_ascii_lowercase().as_str() {
                    "true" => Ok(ValueLiteral::Bool(true)),
                    "false" => Ok(ValueLiteral::Bool(false)),
                    _ => Err(self.error_at(
                        pos,
                        format!("expected literal, found bare word {word:?} (strings must be quoted)"),
                    )),
                }
            }
            _ => Err(self.error_here("expected literal")),
        }
    }

    fn number(&mut self) -> Result<ValueLiteral> {
        let start = self.pos;
        if matches!(self.peek(), Some('+' | '-')) {
            self.advance();
        }
        let mut saw_digit = false;
        let mut saw_dot = false;
        let mut saw_exp = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {
                    saw_digit = true;
                    self.advance();
                }
                '.' if !saw_dot && !saw_exp => {
                    saw_dot = true;
                    self.advance();
                }
                'e' | 'E' if saw_digit && !saw_exp => {
                    saw_exp = true;
                    self.advance();
                    if matches!(self.peek(), Some('+' | '-')) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        let raw = &self.text[start..self.pos];
        if !saw_digit {
            return Err(self.error_at(start, "expected number"));
        }
        if saw_dot || saw_exp {
            let value: f64 = raw
                .parse()
                .map_err(|_| self.error_at(start, format!("invalid float literal {raw:?}")))?;
            Ok(ValueLiteral::Float(value))
        } else {
            let value: i64 = raw
                .parse()
                .map_err(|_| self.error_at(start, format!("invalid integer literal {raw:?}")))?;
            Ok(ValueLiteral::Int(value))
        }
    }

    fn string_literal(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Err(self.error_here("expected string literal")),
        };
        let start = self.pos;
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error_at(start, "unterminated string literal")),
                Some('\\') => match self.advance() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some(other) => {
                        return Err(
                            self.error_at(self.pos - other.len_utf8() - 1, format!("invalid escape '\\{other}'"))
                        )
                    }
                    None => return Err(self.error_at(start, "unterminated string literal")),
                },
                Some(c) if c == quote => break,
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    fn ident(&mut self, expectation: &str) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let word = &self.text[start..self.pos];
        if word.is_empty() || !is_identifier(word) {
            return Err(self.error_at(start, expectation));
        }
        Ok(word.to_string())
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.text[self.pos..].starts_with(kw) {
            self.pos += kw.len();
            Ok(())
        } else {
            Err(self.error_here(format!("expected keyword {kw:?}")))
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        match self.advance() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error_at(
                self.pos.saturating_sub(1),
                format!("expected {expected:?}"),
            )),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, body_pos: usize, message: impl Into<String>) -> Error {
        let abs = self.ph.span_inner.start + body_pos.min(self.text.len());
        let (line, column) = self.ph.source.pos_to_line_col(abs);
        Error::Parse {
            message: message.into(),
            origin: self.ph.source.origin_label(),
            line,
            column,
        }
    }
}
