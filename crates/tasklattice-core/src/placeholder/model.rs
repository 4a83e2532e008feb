//! Core placeholder data model: parameter names, literal values, domains,
//! quote contexts, and the unresolved/resolved parameter records.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::source::{Source, SourceSpan};

/// Identifier matching `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamName(String);

impl ParamName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(Error::invalid_input(format!(
                "invalid parameter name {name:?}: must match [A-Za-z_][A-Za-z0-9_]*"
            )));
        }
        Ok(ParamName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A literal value carried by a placeholder or a substitution map.
///
/// Booleans are never treated as integers; equality is structural, so
/// `Int(1)` and `Float(1.0)` are distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueLiteral {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ValueLiteral {
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueLiteral::Str(_) => "str",
            ValueLiteral::Int(_) => "int",
            ValueLiteral::Float(_) => "float",
            ValueLiteral::Bool(_) => "bool",
        }
    }

    /// Numeric view for interval checks; excludes booleans.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ValueLiteral::Int(i) => Some(*i as f64),
            ValueLiteral::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ValueLiteral::Int(_) | ValueLiteral::Float(_))
    }
}

impl fmt::Display for ValueLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueLiteral::Str(s) => f.write_str(s),
            ValueLiteral::Int(i) => write!(f, "{i}"),
            ValueLiteral::Float(x) => write!(f, "{x}"),
            ValueLiteral::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ValueLiteral {
    fn from(s: &str) -> Self {
        ValueLiteral::Str(s.to_string())
    }
}

impl From<String> for ValueLiteral {
    fn from(s: String) -> Self {
        ValueLiteral::Str(s)
    }
}

impl From<i64> for ValueLiteral {
    fn from(i: i64) -> Self {
        ValueLiteral::Int(i)
    }
}

impl From<f64> for ValueLiteral {
    fn from(f: f64) -> Self {
        ValueLiteral::Float(f)
    }
}

impl From<bool> for ValueLiteral {
    fn from(b: bool) -> Self {
        ValueLiteral::Bool(b)
    }
}

/// The four scalar types a parameter can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveType {
    Str,
    Int,
    Float,
    Bool,
}

impl EffectiveType {
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "str" => Some(EffectiveType::Str),
            "int" => Some(EffectiveType::Int),
            "float" => Some(EffectiveType::Float),
            "bool" => Some(EffectiveType::Bool),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EffectiveType::Str => "str",
            EffectiveType::Int => "int",
            EffectiveType::Float => "float",
            EffectiveType::Bool => "bool",
        }
    }

    pub fn matches(&self, value: &ValueLiteral) -> bool {
        matches!(
            (self, value),
            (EffectiveType::Str, ValueLiteral::Str(_))
                | (EffectiveType::Int, ValueLiteral::Int(_))
                | (EffectiveType::Float, ValueLiteral::Float(_))
                | (EffectiveType::Bool, ValueLiteral::Bool(_))
        )
    }
}

impl fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved value domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    Interval {
        lower: ValueLiteral,
        upper: ValueLiteral,
        inclusive_lower: bool,
        inclusive_upper: bool,
    },
    Set {
        values: Vec<ValueLiteral>,
    },
}

impl Domain {
    pub fn contains(&self, value: &ValueLiteral) -> bool {
        match self {
            Domain::Interval {
                lower,
                upper,
                inclusive_lower,
                inclusive_upper,
            } => {
                // Booleans are never numeric.
                let Some(v) = value.as_number() else {
                    return false;
                };
                let lo = lower.as_number().unwrap_or(f64::NEG_INFINITY);
                let hi = upper.as_number().unwrap_or(f64::INFINITY);
                if v < lo || (v == lo && !*inclusive_lower) {
                    return false;
                }
                if v > hi || (v == hi && !*inclusive_upper) {
                    return false;
                }
                true
            }
            Domain::Set { values } => values.iter().any(|entry| entry == value),
        }
    }
}

/// Interval domain as parsed, before type coercion. The bracket characters
/// are kept so error messages can echo the original spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRaw {
    pub lower: ValueLiteral,
    pub upper: ValueLiteral,
    pub lpar: char,
    pub rpar: char,
}

/// Set domain as parsed, before type coercion. Entry order is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRaw {
    pub entries: Vec<ValueLiteral>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainRaw {
    Interval(IntervalRaw),
    Set(SetRaw),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    Single,
    Double,
}

impl QuoteStyle {
    pub fn ch(&self) -> char {
        match self {
            QuoteStyle::Single => '\'',
            QuoteStyle::Double => '"',
        }
    }
}

/// Detected quote pair immediately surrounding a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteContext {
    pub style: QuoteStyle,
    pub left_index: usize,
    pub right_index: usize,
}

impl QuoteContext {
    /// Span covering the quotes and everything between them.
    pub fn exterior(&self) -> SourceSpan {
        SourceSpan {
            start: self.left_index,
            end: self.right_index + 1,
        }
    }

    /// Span strictly between the quotes.
    pub fn interior(&self) -> SourceSpan {
        SourceSpan {
            start: self.left_index + 1,
            end: self.right_index,
        }
    }
}

/// One `{{TL …}}` occurrence in a source.
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub source: Arc<Source>,
    /// Covers the full `{{…}}` token.
    pub span_outer: SourceSpan,
    /// Covers the `TL …` body between the braces.
    pub span_inner: SourceSpan,
    pub quote: Option<QuoteContext>,
}

impl Placeholder {
    pub fn body(&self) -> &str {
        self.source.slice(self.span_inner)
    }

    /// 1-indexed position of the token start, for diagnostics.
    pub fn line_col(&self) -> (usize, usize) {
        self.source.pos_to_line_col(self.span_outer.start)
    }
}

/// Parameter record as parsed from a placeholder body, before resolution.
#[derive(Debug, Clone)]
pub struct ParamUnresolved {
    pub name: ParamName,
    pub default: ValueLiteral,
    pub declared_type: Option<String>,
    pub domain: Option<DomainRaw>,
    pub description: Option<String>,
    pub placeholder: Placeholder,
}

/// Fully resolved parameter: effective type chosen, default coerced and
/// checked against the domain.
#[derive(Debug, Clone)]
pub struct ParamResolved {
    pub name: ParamName,
    pub default: ValueLiteral,
    pub effective_type: EffectiveType,
    pub domain: Option<Domain>,
    pub description: Option<String>,
    pub placeholder: Placeholder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_name_validation() {
        assert!(ParamName::new("alpha_2").is_ok());
        assert!(ParamName::new("_x").is_ok());
        assert!(ParamName::new("2x").is_err());
        assert!(ParamName::new("a-b").is_err());
        assert!(ParamName::new("").is_err());
    }

    #[test]
    fn interval_contains_respects_inclusivity() {
        let dom = Domain::Interval {
            lower: ValueLiteral::Int(0),
            upper: ValueLiteral::Int(10),
            inclusive_lower: true,
            inclusive_upper: false,
        };
        assert!(dom.contains(&ValueLiteral::Int(0)));
        assert!(dom.contains(&ValueLiteral::Float(9.5)));
        assert!(!dom.contains(&ValueLiteral::Int(10)));
        assert!(!dom.contains(&ValueLiteral::Bool(true)));
        assert!(!dom.contains(&ValueLiteral::Str("5".into())));
    }

    #[test]
    fn degenerate_interval_accepts_point_only_if_both_inclusive() {
        let closed = Domain::Interval {
            lower: ValueLiteral::Float(2.0),
            upper: ValueLiteral::Float(2.0),
            inclusive_lower: true,
            inclusive_upper: true,
        };
        assert!(closed.contains(&ValueLiteral::Float(2.0)));

        let half_open = Domain::Interval {
            lower: ValueLiteral::Float(2.0),
            upper: ValueLiteral::Float(2.0),
            inclusive_lower: true,
            inclusive_upper: false,
        };
        assert!(!half_open.contains(&ValueLiteral::Float(2.0)));
    }

    #[test]
    fn set_membership_is_structural() {
        let dom = Domain::Set {
            values: vec![ValueLiteral::Int(1), ValueLiteral::Str("a".into())],
        };
        assert!(dom.contains(&ValueLiteral::Int(1)));
        assert!(dom.contains(&ValueLiteral::Str("a".into())));
        assert!(!dom.contains(&ValueLiteral::Float(1.0)));
        assert!(!dom.contains(&ValueLiteral::Bool(true)));
    }

    #[test]
    fn empty_set_rejects_everything() {
        let dom = Domain::Set { values: vec![] };
        assert!(!dom.contains(&ValueLiteral::Int(0)));
        assert!(!dom.contains(&ValueLiteral::Str(String::new().into())));
    }
}
