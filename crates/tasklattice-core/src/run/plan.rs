//! Declarative run blueprints: what to copy, what to render, and how.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::constants::RUN_METADATA_DIR;
use crate::errors::{Error, Result};
use crate::paths::{AbsDir, RelPath};

/// One templated file: where the template lives in the prototype and where
/// the rendered output lands in the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderSpec {
    pub source_relpath: RelPath,
    pub target_relpath: RelPath,
    pub encoding: String,
    pub mode: u32,
}

/// User-facing input for a render spec: a path, or a `(source, target)`
/// pair when the output name differs.
#[derive(Debug, Clone)]
pub enum UserRenderSpec {
    Same(String),
    Pair(String, String),
}

impl From<&str> for UserRenderSpec {
    fn from(s: &str) -> Self {
        UserRenderSpec::Same(s.to_string())
    }
}

impl From<(&str, &str)> for UserRenderSpec {
    fn from((src, tgt): (&str, &str)) -> Self {
        UserRenderSpec::Pair(src.to_string(), tgt.to_string())
    }
}

impl RenderSpec {
    pub fn construct(prototype_dir: &AbsDir, item: &UserRenderSpec) -> Result<RenderSpec> {
        let (src_rel, tgt_rel) = match item {
            UserRenderSpec::Same(rel) => (RelPath::new(rel)?, RelPath::new(rel)?),
            UserRenderSpec::Pair(src, tgt) => (RelPath::new(src)?, RelPath::new(tgt)?),
        };

        let src_abs = src_rel.join_under(prototype_dir.path());
        if !src_abs.is_file() {
            return Err(Error::invalid_input(format!(
                "template not found in prototype: {}",
                src_abs.display()
            )));
        }

        Ok(RenderSpec {
            source_relpath: src_rel,
            target_relpath: tgt_rel,
            encoding: "utf-8".into(),
            mode: 0o644,
        })
    }
}

/// How prototype files land in the run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Portable copy preserving permission bits.
    Copy,
    /// Symlink to the prototype; falls back to copy on OS error.
    Symlink,
    /// Hardlink to the prototype; same filesystem only, falls back to copy.
    Hardlink,
}

impl LinkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMode::Copy => "copy",
            LinkMode::Symlink => "symlink",
            LinkMode::Hardlink => "hardlink",
        }
    }
}

const DEFAULT_INCLUDE_GLOBS: &[&str] = &["**/*"];

const DEFAULT_EXCLUDE_GLOBS: &[&str] = &[
    ".git/**",
    ".hg/**",
    ".svn/**",
    "__pycache__/**",
    ".DS_Store",
    "Thumbs.db",
    "_tl/**",
];

/// Knobs for building a [`RunPlan`]; `Default` gives the documented
/// defaults (copy link mode, `\n` newline with trailing-newline
/// enforcement, VCS/OS-cruft excludes).
#[derive(Debug, Clone)]
pub struct RunPlanOptions {
    pub link_mode: LinkMode,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// `None` leaves line endings as produced by the renderer.
    pub newline: Option<String>,
    pub ensure_trailing_newline: bool,
    /// Globs deleted from the run directory after a successful run.
    pub post_run_prune_globs: Vec<String>,
    /// Constant provenance copied into each run's metadata.
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Default for RunPlanOptions {
    fn default() -> Self {
        RunPlanOptions {
            link_mode: LinkMode::Copy,
            include_globs: DEFAULT_INCLUDE_GLOBS.iter().map(|s| s.to_string()).collect(),
            exclude_globs: DEFAULT_EXCLUDE_GLOBS.iter().map(|s| s.to_string()).collect(),
            newline: Some("\n".into()),
            ensure_trailing_newline: true,
            post_run_prune_globs: vec![],
            meta: BTreeMap::new(),
        }
    }
}

/// Immutable blueprint for materializing runs of one sweep.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub name: String,
    pub runs_root: AbsDir,
    pub prototype_dir: AbsDir,
    pub render_files: Vec<RenderSpec>,
    pub link_mode: LinkMode,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub newline: Option<String>,
    pub ensure_trailing_newline: bool,
    pub post_run_prune_globs: Vec<String>,
    pub meta: BTreeMap<String, serde_json::Value>,

    include_set: GlobSet,
    exclude_set: GlobSet,
}

impl RunPlan {
    pub fn new(
        name: impl Into<String>,
        runs_root: impl AsRef<Path>,
        prototype_dir: impl AsRef<Path>,
        render_files: Vec<UserRenderSpec>,
        options: RunPlanOptions,
    ) -> Result<RunPlan> {
        let runs_root = AbsDir::any(runs_root.as_ref());
        let prototype_dir = AbsDir::existing(prototype_dir.as_ref())?;

        let mut specs = Vec::with_capacity(render_files.len());
        for item in &render_files {
            specs.push(RenderSpec::construct(&prototype_dir, item)?);
        }

        let mut seen: HashSet<&RelPath> = HashSet::new();
        for spec in &specs {
            if !seen.insert(&spec.target_relpath) {
                return Err(Error::invalid_input(format!(
                    "duplicate render target: {}",
                    spec.target_relpath
                )));
            }
            let first_component = spec.target_relpath.parts().next().unwrap_or_default();
            if first_component == RUN_METADATA_DIR {
                return Err(Error::invalid_input(format!(
                    "render targets may not write under the reserved prefix '{RUN_METADATA_DIR}': {}",
                    spec.target_relpath
                )));
            }
        }

        let include_set = build_glob_set(&options.include_globs)?;
        let exclude_set = build_glob_set(&options.exclude_globs)?;

        Ok(RunPlan {
            name: name.into(),
            runs_root,
            prototype_dir,
            render_files: specs,
            link_mode: options.link_mode,
            include_globs: options.include_globs,
            exclude_globs: options.exclude_globs,
            newline: options.newline,
            ensure_trailing_newline: options.ensure_trailing_newline,
            post_run_prune_globs: options.post_run_prune_globs,
            meta: options.meta,
            include_set,
            exclude_set,
        })
    }

    /// Include/exclude verdict for a POSIX-style relative path.
    pub fn selects(&self, relpath: &str) -> bool {
        if !self.include_globs.is_empty() && !self.include_set.is_match(relpath) {
            return false;
        }
        if !self.exclude_globs.is_empty() && self.exclude_set.is_match(relpath) {
            return false;
        }
        true
    }
}

fn build_glob_set(globs: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in globs {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::invalid_input(format!("invalid glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::invalid_input(format!("failed to build glob set: {e}")))
}
