//! Locate `{{TL …}}` tokens in a source and detect their quote context.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::{Error, Result};
use crate::source::{Source, SourceSpan};

use super::model::{Placeholder, QuoteContext, QuoteStyle};

lazy_static! {
    static ref OPEN_RE: Regex = Regex::new(r"\{\{[ \t]*TL\b").expect("static regex");
}

/// Scan a source for placeholder tokens, in order of appearance. The body
/// ends at the first `}}` (non-greedy); an unterminated token is an error.
pub fn scan_placeholders(source: &Arc<Source>) -> Result<Vec<Placeholder>> {
    let text = source.text();
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while let Some(m) = OPEN_RE.find_at(text, cursor) {
        let open = m.start();
        let close = match text[m.end()..].find("}}") {
            Some(rel) => m.end() + rel,
            None => {
                let (line, column) = source.pos_to_line_col(open);
                return Err(Error::Parse {
                    message: "unterminated placeholder: missing '}}'".into(),
                    origin: source.origin_label(),
                    line,
                    column,
                });
            }
        };

        let span_outer = SourceSpan {
            start: open,
            end: close + 2,
        };
        let span_inner = SourceSpan {
            start: open + 2,
            end: close,
        };
        let quote = detect_quote_context(text, span_outer);

        out.push(Placeholder {
            source: Arc::clone(source),
            span_outer,
            span_inner,
            quote,
        });
        cursor = span_outer.end;
    }

    Ok(out)
}

/// A placeholder counts as quoted when the outer span is immediately
/// surrounded (horizontal whitespace tolerated) by matching, un-escaped
/// quotes.
fn detect_quote_context(text: &str, outer: SourceSpan) -> Option<QuoteContext> {
    let bytes = text.as_bytes();

    let left_index = {
        let mut i = outer.start;
        loop {
            if i == 0 {
                return None;
            }
            i -= 1;
            match bytes[i] {
                b' ' | b'\t' => continue,
                b'\'' | b'"' if !is_escaped(bytes, i) => break i,
                _ => return None,
            }
        }
    };

    let right_index = {
        let mut i = outer.end;
        loop {
            if i >= bytes.len() {
                return None;
            }
            match bytes[i] {
                b' ' | b'\t' => i += 1,
                b'\'' | b'"' => break i,
                _ => return None,
            }
        }
    };

    if bytes[left_index] != bytes[right_index] {
        return None;
    }
    let style = if bytes[left_index] == b'\'' {
        QuoteStyle::Single
    } else {
        QuoteStyle::Double
    };
    Some(QuoteContext {
        style,
        left_index,
        right_index,
    })
}

/// A quote is escaped when preceded by an odd number of backslashes.
fn is_escaped(bytes: &[u8], idx: usize) -> bool {
    let mut backslashes = 0;
    let mut i = idx;
    while i > 0 && bytes[i - 1] == b'\\' {
        backslashes += 1;
        i -= 1;
    }
    backslashes % 2 == 1
}
