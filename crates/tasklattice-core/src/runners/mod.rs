//! Runner-side API: portable launch specifications, normalization of user
//! launch inputs, common validation, and the `Runner`/`RunHandle` traits.

pub mod local;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::run::materialize::RunMaterialized;
use crate::run::state::RunStatus;

/// Portable resource hints; backends may ignore unsupported fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpus: Option<u32>,
    pub gpus: Option<u32>,
    pub mem_mb: Option<u64>,
    /// Wall-clock timeout in seconds, enforced by backends that support it.
    pub time_limit_s: Option<u64>,
    pub nodes: Option<u32>,
    pub tasks_per_node: Option<u32>,
    pub exclusive: Option<bool>,
}

/// How to launch a materialized run.
///
/// `cmd[0]` is an executable name or path. `cwd` must be `None` or a
/// relative path (resolved under the run directory by the backend).
/// `stdout_path`/`stderr_path`, when given, must resolve under the run
/// directory. `backend_opts` keys are namespaced `"<ns>.<key>"`.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub resources: Resources,
    pub backend_opts: BTreeMap<String, serde_json::Value>,
}

impl LaunchSpec {
    pub fn from_argv(cmd: impl IntoIterator<Item = impl Into<String>>) -> LaunchSpec {
        LaunchSpec {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..LaunchSpec::default()
        }
    }

    /// Split a shell-style command string into argv (POSIX rules).
    pub fn from_shell(command: &str) -> Result<LaunchSpec> {
        let cmd = shell_words::split(command)
            .map_err(|e| Error::invalid_input(format!("invalid launch command {command:?}: {e}")))?;
        Ok(LaunchSpec::from_argv(cmd))
    }
}

/// Produces the effective launch spec for one materialized run.
pub type LaunchFactory = Arc<dyn Fn(&RunMaterialized) -> Result<LaunchSpec> + Send + Sync>;

/// Anything a user may hand to a runner as "how to launch".
pub enum UserLaunch {
    Spec(LaunchSpec),
    Argv(Vec<String>),
    Shell(String),
    Factory(LaunchFactory),
}

impl From<LaunchSpec> for UserLaunch {
    fn from(spec: LaunchSpec) -> Self {
        UserLaunch::Spec(spec)
    }
}

impl From<&str> for UserLaunch {
    fn from(command: &str) -> Self {
        UserLaunch::Shell(command.to_string())
    }
}

impl From<Vec<String>> for UserLaunch {
    fn from(argv: Vec<String>) -> Self {
        UserLaunch::Argv(argv)
    }
}

impl From<Vec<&str>> for UserLaunch {
    fn from(argv: Vec<&str>) -> Self {
        UserLaunch::Argv(argv.into_iter().map(String::from).collect())
    }
}

/// Normalize any [`UserLaunch`] into a factory. Shell strings are split
/// eagerly so malformed input fails at construction, not at submit.
pub fn ensure_launch_factory(input: UserLaunch) -> Result<LaunchFactory> {
    let constant = |spec: LaunchSpec| -> LaunchFactory { Arc::new(move |_| Ok(spec.clone())) };
    Ok(match input {
        UserLaunch::Factory(f) => f,
        UserLaunch::Spec(spec) => constant(spec),
        UserLaunch::Argv(argv) => constant(LaunchSpec::from_argv(argv)),
        UserLaunch::Shell(command) => constant(LaunchSpec::from_shell(&command)?),
    })
}

/// Namespaces accepted for `backend_opts` keys.
pub const ALLOWED_BACKEND_OPT_NAMESPACES: &[&str] = &["local", "slurm", "k8s"];

/// Runner-agnostic sanity checks; backends may add stricter ones.
pub fn validate_spec_common(spec: &LaunchSpec, run_dir: &Path) -> Result<()> {
    if spec.cmd.is_empty() || spec.cmd.iter().any(|c| c.is_empty()) {
        return Err(Error::invalid_input(
            "LaunchSpec.cmd must be a non-empty sequence of non-empty strings",
        ));
    }

    let res = &spec.resources;
    for (label, value) in [
        ("cpus", res.cpus.map(u64::from)),
        ("gpus", res.gpus.map(u64::from)),
        ("mem_mb", res.mem_mb),
        ("time_limit_s", res.time_limit_s),
        ("nodes", res.nodes.map(u64::from)),
        ("tasks_per_node", res.tasks_per_node.map(u64::from)),
    ] {
        if value == Some(0) {
            return Err(Error::invalid_input(format!(
                "Resources.{label} must be positive when present"
            )));
        }
    }

    if let Some(cwd) = &spec.cwd {
        if cwd.is_absolute() {
            return Err(Error::invalid_input(
                "LaunchSpec.cwd must be None or a relative path (resolved under the run directory)",
            ));
        }
    }

    for (label, path) in [("stdout_path", &spec.stdout_path), ("stderr_path", &spec.stderr_path)] {
        if let Some(path) = path {
            if !resolves_under(path, run_dir) {
                return Err(Error::invalid_input(format!(
                    "LaunchSpec.{label} must resolve under the run directory (got: {})",
                    path.display()
                )));
            }
        }
    }

    for key in spec.backend_opts.keys() {
        let valid = key
            .split_once('.')
            .is_some_and(|(ns, rest)| !rest.is_empty() && ALLOWED_BACKEND_OPT_NAMESPACES.contains(&ns));
        if !valid {
            return Err(Error::invalid_input(format!(
                "backend_opts key {key:?} must be namespaced (ns.key) with ns in {ALLOWED_BACKEND_OPT_NAMESPACES:?}"
            )));
        }
    }

    Ok(())
}

/// Lexical containment check: does `path` (absolute, or joined under
/// `root`) stay inside `root` after resolving `.`/`..` components?
pub(crate) fn resolves_under(path: &Path, root: &Path) -> bool {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in abs.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return false;
                }
            }
            other => normalized.push(other),
        }
    }
    normalized.starts_with(root)
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait RunHandle: Send + Sync {
    fn run_id(&self) -> &str;

    /// Backend-native identifier (e.g. the PID), when known.
    fn external_id(&self) -> Option<String>;

    fn status(&self) -> RunStatus;

    /// Block until the run reaches a terminal state (or the timeout
    /// elapses); returns the status either way.
    fn wait(&self, timeout: Option<Duration>) -> RunStatus;

    /// Best-effort cancellation for queued or running runs.
    fn cancel(&self, force: bool, grace: Option<Duration>, reason: Option<&str>);

    fn return_code(&self) -> Option<i64>;
    fn stdout_path(&self) -> Option<PathBuf>;
    fn stderr_path(&self) -> Option<PathBuf>;
}

pub trait Runner {
    fn name(&self) -> &str;

    fn submit(&self, run: &RunMaterialized) -> Result<Box<dyn RunHandle>>;

    /// Reconstruct a handle for a run submitted earlier (possibly by
    /// another process), from its persisted state.
    fn attach(&self, run: &RunMaterialized) -> Result<Option<Box<dyn RunHandle>>>;

    /// Stop background machinery. Does not mutate per-run state.
    fn close(&self);

    fn effective_spec(&self, run: &RunMaterialized) -> Result<LaunchSpec>;

    /// Backend-specific checks after defaults/normalization.
    fn validate_spec(&self, spec: &LaunchSpec, run_dir: &Path) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_dir() -> PathBuf {
        PathBuf::from("/runs/abc-def")
    }

    #[test]
    fn shell_strings_split_posix_style() {
        let spec = LaunchSpec::from_shell("python main.py --name 'a b'").unwrap();
        assert_eq!(spec.cmd, vec!["python", "main.py", "--name", "a b"]);
        assert!(LaunchSpec::from_shell("unterminated 'quote").is_err());
    }

    #[test]
    fn empty_cmd_is_rejected() {
        let spec = LaunchSpec::default();
        assert!(validate_spec_common(&spec, &run_dir()).is_err());
    }

    #[test]
    fn zero_resources_are_rejected() {
        let mut spec = LaunchSpec::from_argv(["true"]);
        spec.resources.time_limit_s = Some(0);
        assert!(validate_spec_common(&spec, &run_dir()).is_err());

        spec.resources.time_limit_s = Some(1);
        assert!(validate_spec_common(&spec, &run_dir()).is_ok());
    }

    #[test]
    fn absolute_cwd_is_rejected() {
        let mut spec = LaunchSpec::from_argv(["true"]);
        spec.cwd = Some(PathBuf::from("/tmp"));
        assert!(validate_spec_common(&spec, &run_dir()).is_err());

        spec.cwd = Some(PathBuf::from("work"));
        assert!(validate_spec_common(&spec, &run_dir()).is_ok());
    }

    #[test]
    fn log_paths_must_stay_under_run_dir() {
        let mut spec = LaunchSpec::from_argv(["true"]);
        spec.stdout_path = Some(PathBuf::from("logs/out.log"));
        assert!(validate_spec_common(&spec, &run_dir()).is_ok());

        spec.stdout_path = Some(PathBuf::from("../outside.log"));
        assert!(validate_spec_common(&spec, &run_dir()).is_err());

        spec.stdout_path = Some(PathBuf::from("/etc/out.log"));
        assert!(validate_spec_common(&spec, &run_dir()).is_err());
    }

    #[test]
    fn backend_opts_must_be_namespaced() {
        let mut spec = LaunchSpec::from_argv(["true"]);
        spec.backend_opts
            .insert("slurm.partition".into(), serde_json::json!("gpu"));
        assert!(validate_spec_common(&spec, &run_dir()).is_ok());

        spec.backend_opts.insert("partition".into(), serde_json::json!("gpu"));
        assert!(validate_spec_common(&spec, &run_dir()).is_err());

        spec.backend_opts.clear();
        spec.backend_opts.insert("pbs.queue".into(), serde_json::json!("q"));
        assert!(validate_spec_common(&spec, &run_dir()).is_err());
    }

    #[test]
    fn launch_factory_normalizes_every_input_form() {
        let factory = ensure_launch_factory("echo hi there".into()).unwrap();
        let fake = RunMaterialized {
            run_id: "x-y".into(),
            run_dir: run_dir(),
            plan_fingerprint: "x".into(),
            subs_fingerprint: "y".into(),
            file_records: vec![],
        };
        assert_eq!(factory(&fake).unwrap().cmd, vec!["echo", "hi", "there"]);

        let factory = ensure_launch_factory(vec!["a", "b c"].into()).unwrap();
        assert_eq!(factory(&fake).unwrap().cmd, vec!["a", "b c"]);
    }
}
