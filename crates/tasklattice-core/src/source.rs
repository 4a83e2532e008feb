//! Immutable source buffers and half-open spans.
//!
//! A [`Source`] owns the text of one template file (or in-memory string)
//! plus a lazily computed line-start table used to turn byte offsets into
//! 1-indexed line/column pairs for diagnostics.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::errors::{Error, Result};

/// Half-open byte range `[start, end)` into a source text. Empty spans are
/// forbidden: sequence elements always cover at least one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if end <= start {
            return Err(Error::invalid_input(format!(
                "span end ({end}) must be greater than start ({start})"
            )));
        }
        Ok(SourceSpan { start, end })
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        false // construction forbids empty spans
    }
}

#[derive(Debug)]
pub struct Source {
    origin: Option<PathBuf>,
    text: String,
    line_starts: OnceLock<Vec<usize>>,
}

impl Source {
    pub fn from_string(text: impl Into<String>) -> Result<Arc<Self>> {
        let text = text.into();
        if text.is_empty() {
            return Err(Error::invalid_input("empty source contents given"));
        }
        Ok(Arc::new(Source {
            origin: None,
            text,
            line_starts: OnceLock::new(),
        }))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io("failed to read source file", path, e))?;
        if text.is_empty() {
            return Err(Error::invalid_input(format!(
                "empty file encountered: {}",
                path.display()
            )));
        }
        Ok(Arc::new(Source {
            origin: Some(path.to_path_buf()),
            text,
            line_starts: OnceLock::new(),
        }))
    }

    /// Label used in diagnostics: the file path, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn origin_label(&self) -> Option<String> {
        self.origin.as_ref().map(|p| p.display().to_string())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        false // construction forbids empty sources
    }

    pub fn full_span(&self) -> SourceSpan {
        SourceSpan {
            start: 0,
            end: self.text.len(),
        }
    }

    pub fn slice(&self, span: SourceSpan) -> &str {
        &self.text[span.start..span.end]
    }

    fn line_starts(&self) -> &[usize] {
        self.line_starts.get_or_init(|| {
            let mut starts = vec![0usize];
            for (i, b) in self.text.bytes().enumerate() {
                if b == b'\n' {
                    starts.push(i + 1);
                }
            }
            starts
        })
    }

    /// 1-indexed (line, column) for a byte offset. Accepts `pos == len()`
    /// so a caret can point just past the end of the text.
    pub fn pos_to_line_col(&self, pos: usize) -> (usize, usize) {
        let pos = pos.min(self.text.len());
        let starts = self.line_starts();
        let line_idx = match starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line_idx + 1, pos - starts[line_idx] + 1)
    }
}
