//! Single place for metadata names, schema versions, and path helpers.
//!
//! Both materialization and runner code import from here so the `_tl`
//! directory layout is never spelled twice.

use std::path::{Path, PathBuf};

/// Reserved metadata directory inside every run directory.
pub const RUN_METADATA_DIR: &str = "_tl";

// static, written once at materialization time
pub const INPUTS_BASENAME: &str = "inputs.json";
pub const FILES_BASENAME: &str = "files.json";

// dynamic, updated by runners
pub const RUNFILE_BASENAME: &str = "run.json";
pub const STDOUT_BASENAME: &str = "stdout.log";
pub const STDERR_BASENAME: &str = "stderr.log";

/// Schema version of `files.json`.
pub const FILES_SCHEMA: u32 = 0;
/// Schema version of `inputs.json`.
pub const INPUTS_SCHEMA: u32 = 0;
/// Schema version of `run.json`.
pub const RUNFILE_SCHEMA: u32 = 0;

/// Metadata directory inside a run directory.
pub fn meta_dir(run_dir: &Path) -> PathBuf {
    run_dir.join(RUN_METADATA_DIR)
}

/// Path to the static materialization `inputs.json`.
pub fn inputs_path(run_dir: &Path) -> PathBuf {
    meta_dir(run_dir).join(INPUTS_BASENAME)
}

/// Path to the static materialization `files.json`.
pub fn files_path(run_dir: &Path) -> PathBuf {
    meta_dir(run_dir).join(FILES_BASENAME)
}

/// Path to the dynamic run-state file written by runners.
pub fn run_file_path(run_dir: &Path) -> PathBuf {
    meta_dir(run_dir).join(RUNFILE_BASENAME)
}

/// Default stdout log path for a run.
pub fn default_stdout_path(run_dir: &Path) -> PathBuf {
    meta_dir(run_dir).join(STDOUT_BASENAME)
}

/// Default stderr log path for a run.
pub fn default_stderr_path(run_dir: &Path) -> PathBuf {
    meta_dir(run_dir).join(STDERR_BASENAME)
}
