//! Strong path types used throughout plans and manifests.
//!
//! - [`RelPath`]: POSIX-style relative path inside a prototype/run layout.
//!   Validated once at construction, stored with forward slashes.
//! - [`AbsDir`]: a normalized directory path. Factories control whether the
//!   directory must already exist.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// POSIX-style relative path (no leading '/', no drive anchor, no '..').
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelPath(String);

impl RelPath {
    pub fn new(p: impl AsRef<str>) -> Result<Self> {
        let raw = p.as_ref();
        let s = raw.replace('\\', "/");

        let drive_anchored = {
            let bytes = s.as_bytes();
            bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
        };
        if s.starts_with('/') || s.starts_with("//") || drive_anchored {
            return Err(Error::invalid_input(format!(
                "relative path must not be absolute or anchored: {raw:?}"
            )));
        }

        let parts: Vec<&str> = s.split('/').filter(|seg| !seg.is_empty() && *seg != ".").collect();
        if parts.is_empty() {
            return Err(Error::invalid_input("relative path may not be empty"));
        }
        if parts.iter().any(|seg| *seg == "..") {
            return Err(Error::invalid_input(format!(
                "relative path may not contain '..': {raw:?}"
            )));
        }

        Ok(RelPath(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Join under a base directory using native separators.
    pub fn join_under(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for seg in self.parts() {
            out.push(seg);
        }
        out
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized directory path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsDir {
    path: PathBuf,
}

impl AbsDir {
    /// The directory must already exist.
    pub fn existing(p: impl Into<PathBuf>) -> Result<Self> {
        let q: PathBuf = p.into();
        if !q.exists() {
            return Err(Error::invalid_input(format!("no such directory: {}", q.display())));
        }
        if !q.is_dir() {
            return Err(Error::invalid_input(format!(
                "expected a directory: {}",
                q.display()
            )));
        }
        Ok(AbsDir { path: q })
    }

    /// Normalized path that may not exist yet (created later).
    pub fn any(p: impl Into<PathBuf>) -> Self {
        AbsDir { path: p.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for AbsDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
