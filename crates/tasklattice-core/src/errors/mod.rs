//! Crate-wide error type.
//!
//! One enum with kind-shaped variants; parse failures carry the source
//! label and 1-indexed line/column of the offending span so callers can
//! point at the exact placeholder.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid user input outside of placeholder parsing (bad names,
    /// duplicate targets, reserved prefixes, malformed launch specs, ...).
    #[error("{0}")]
    InvalidInput(String),

    /// Malformed placeholder body or unresolved quote context.
    #[error("{src}:{line}:{column}: {message}", src = .origin.as_deref().unwrap_or("<string>"))]
    Parse {
        message: String,
        origin: Option<String>,
        line: usize,
        column: usize,
    },

    /// Incompatible coercion or substitution value of the wrong type.
    #[error("type error for parameter '{param}': {message}")]
    Type { param: String, message: String },

    /// Value (default or substitution) outside the declared domain.
    #[error("domain error for parameter '{param}': {message}")]
    Domain { param: String, message: String },

    /// Conflicting assignment during a lattice merge or constrained search.
    #[error("conflicting assignment for parameter '{0}'")]
    Conflict(String),

    /// Unknown profile name or invalid profile registration.
    #[error("{0}")]
    Profile(String),

    /// The run directory for this (plan, subs) pair already exists.
    #[error("run directory already materialized: {0}")]
    AlreadyMaterialized(PathBuf),

    /// Filesystem failure with the path that triggered it.
    #[error("{message}: {path}")]
    Io {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Corrupt or inconsistent on-disk metadata.
    #[error("{message}: {path}")]
    Metadata { message: String, path: PathBuf },

    /// Runner-side failure (spawn, state file, cancellation plumbing).
    #[error("{0}")]
    Runner(String),
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    pub fn type_error(param: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Type {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn domain_error(param: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Domain {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    pub fn metadata(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::Metadata {
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn runner(message: impl Into<String>) -> Self {
        Error::Runner(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn parse_error_renders_origin_and_position() {
        let err = Error::Parse {
            message: "unknown meta key 'dsec'".into(),
            origin: Some("in.yaml".into()),
            line: 3,
            column: 14,
        };
        assert_eq!(err.to_string(), "in.yaml:3:14: unknown meta key 'dsec'");
    }

    #[test]
    fn parse_error_without_origin_uses_placeholder_label() {
        let err = Error::Parse {
            message: "expected '='".into(),
            origin: None,
            line: 1,
            column: 5,
        };
        assert!(err.to_string().starts_with("<string>:1:5"));
    }
}
