//! Per-run state document (`_tl/run.json`) with typed status transitions.
//!
//! The status machine is monotonic toward a terminal state:
//! `staged → queued → running → {succeeded | failed | cancelled | timed_out}`.
//! All writes go through the atomic-replace protocol.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{run_file_path, RUNFILE_SCHEMA};
use crate::errors::Result;
use crate::run::io::{json_atomic_write, json_load, now_iso};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Staged,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled | RunStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Staged => "staged",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::TimedOut => "timed_out",
        }
    }
}

/// The persisted run-state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFile {
    pub schema: u32,
    pub status: RunStatus,
    pub created_at: Option<String>,
    pub submitted_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub updated_at: Option<String>,
    pub update_reason: Option<String>,
    pub runner_kind: Option<String>,
    #[serde(default)]
    pub runner_meta: BTreeMap<String, serde_json::Value>,
    pub variant_hash: Option<String>,
    pub exit_code: Option<i64>,
}

impl Default for RunFile {
    fn default() -> Self {
        RunFile {
            schema: RUNFILE_SCHEMA,
            status: RunStatus::Staged,
            created_at: None,
            submitted_at: None,
            started_at: None,
            finished_at: None,
            updated_at: None,
            update_reason: None,
            runner_kind: None,
            runner_meta: BTreeMap::new(),
            variant_hash: None,
            exit_code: None,
        }
    }
}

impl RunFile {
    /// Fresh document stamped with a creation time.
    pub fn staged() -> Self {
        RunFile {
            created_at: Some(now_iso()),
            ..RunFile::default()
        }
    }

    /// Read the document for a run directory. Absence (or corruption) is
    /// `None`; recovery paths start over from [`RunFile::staged`].
    pub fn load(run_dir: &Path) -> Option<RunFile> {
        json_load(&run_file_path(run_dir))
    }

    /// Atomically replace the on-disk document.
    pub fn save(&self, run_dir: &Path) -> Result<()> {
        json_atomic_write(&run_file_path(run_dir), self)
    }

    /// Produce an updated copy; `updated_at` is refreshed unless `touch` is
    /// false.
    pub fn evolve(&self, touch: bool, apply: impl FnOnce(&mut RunFile)) -> RunFile {
        let mut next = self.clone();
        apply(&mut next);
        if touch {
            next.updated_at = Some(now_iso());
        }
        next
    }

    /// Merge keys into `runner_meta`.
    pub fn evolve_meta(
        &self,
        touch: bool,
        entries: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> RunFile {
        self.evolve(touch, |rf| {
            rf.runner_meta.extend(entries);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_disk_format() {
        assert_eq!(
            serde_json::to_string(&RunStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
        assert_eq!(
            serde_json::from_str::<RunStatus>("\"succeeded\"").unwrap(),
            RunStatus::Succeeded
        );
    }

    #[test]
    fn terminal_set_is_exactly_the_four_final_states() {
        for s in [RunStatus::Staged, RunStatus::Queued, RunStatus::Running] {
            assert!(!s.is_terminal());
        }
        for s in [
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::TimedOut,
        ] {
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunFile::load(dir.path()).is_none());

        let rf = RunFile::staged().evolve(true, |rf| {
            rf.status = RunStatus::Queued;
            rf.submitted_at = Some(now_iso());
            rf.runner_kind = Some("local".into());
        });
        rf.save(dir.path()).unwrap();

        let loaded = RunFile::load(dir.path()).unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
        assert_eq!(loaded.runner_kind.as_deref(), Some("local"));
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn evolve_refreshes_updated_at_unless_suppressed() {
        let rf = RunFile::default();
        let touched = rf.evolve(true, |rf| rf.status = RunStatus::Queued);
        assert!(touched.updated_at.is_some());

        let untouched = rf.evolve(false, |rf| rf.status = RunStatus::Queued);
        assert!(untouched.updated_at.is_none());
    }

    #[test]
    fn evolve_meta_merges_keys() {
        let rf = RunFile::default().evolve_meta(false, [("pid".to_string(), serde_json::json!(42))]);
        let rf = rf.evolve_meta(false, [("host".to_string(), serde_json::json!("node1"))]);
        assert_eq!(rf.runner_meta["pid"], serde_json::json!(42));
        assert_eq!(rf.runner_meta["host"], serde_json::json!("node1"));
    }
}
