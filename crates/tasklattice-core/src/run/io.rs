//! Atomic file writes and tolerant JSON reads for run metadata.
//!
//! Protocol: write to `X.tmp` in the same directory, flush, fsync the file,
//! rename to `X`, then best-effort fsync the containing directory.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::errors::{Error, Result};

pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io("failed to create parent directories", parent, e))?;
    }
    Ok(())
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent_dirs(path)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::metadata("atomic write target has no file name", path))?;
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)
        .map_err(|e| Error::io("failed to open temp file", &tmp, e))?;
    f.write_all(bytes)
        .map_err(|e| Error::io("failed to write temp file", &tmp, e))?;
    f.flush().map_err(|e| Error::io("failed to flush temp file", &tmp, e))?;
    f.sync_all()
        .map_err(|e| Error::io("failed to fsync temp file", &tmp, e))?;
    drop(f);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io("failed to rename temp file into place", path, e));
    }

    fsync_dir_best_effort(path.parent());
    Ok(())
}

/// Make a rename durable where the platform allows opening directories.
pub(crate) fn fsync_dir_best_effort(dir: Option<&Path>) {
    #[cfg(unix)]
    if let Some(dir) = dir {
        if let Ok(f) = File::open(dir) {
            let _ = f.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

pub fn json_atomic_write<T: serde::Serialize>(path: &Path, payload: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(payload)
        .map_err(|e| Error::metadata(format!("failed to encode JSON: {e}"), path))?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

/// Read a JSON document; absence (or unreadable/corrupt content) yields
/// `None` so recovery paths can fall back to defaults.
pub fn json_load<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Strict variant used where corruption must surface instead of being
/// treated as absence.
pub fn json_load_strict<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| Error::io("failed to read JSON file", path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::metadata(format!("corrupt JSON: {e}"), path))
}
