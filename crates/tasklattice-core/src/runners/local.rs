//! Local subprocess runner.
//!
//! One OS process per run, one monitor thread per runner. A single runner
//! mutex guards the active map and the pending FIFO (with a condvar for
//! wakeups); a per-run mutex serializes `run.json` writes across the
//! submit path, cancellation, and the monitor.
//!
//! Lock ordering: the runner lock is never acquired while holding a
//! per-run lock.

use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::constants::{default_stderr_path, default_stdout_path, meta_dir};
use crate::errors::{Error, Result};
use crate::platform;
use crate::run::io::{ensure_parent_dirs, now_iso};
use crate::run::materialize::RunMaterialized;
use crate::run::state::{RunFile, RunStatus};
use crate::runners::{
    ensure_launch_factory, validate_spec_common, LaunchFactory, LaunchSpec, RunHandle, Runner,
    UserLaunch,
};

/// Admission control for concurrent subprocesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxParallel {
    /// `max(1, cpu_count - 1)`: leave a core free.
    Auto,
    /// No cap.
    Unbounded,
    /// Fixed positive cap.
    Fixed(usize),
}

impl MaxParallel {
    fn resolve(self) -> Result<Option<usize>> {
        match self {
            MaxParallel::Auto => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                Ok(Some(cpus.saturating_sub(1).max(1)))
            }
            MaxParallel::Unbounded => Ok(None),
            MaxParallel::Fixed(0) => Err(Error::invalid_input(
                "max_parallel must be > 0, or Auto/Unbounded",
            )),
            MaxParallel::Fixed(n) => Ok(Some(n)),
        }
    }
}

const DEFAULT_GRACE: Duration = Duration::from_secs(5);
const MONITOR_TICK: Duration = Duration::from_millis(250);
const ATTACH_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Terminal(RunStatus),
}

struct HandleState {
    phase: Phase,
    pid: Option<u32>,
    exit_code: Option<i64>,
    cancel_requested: bool,
    timed_out: bool,
}

/// State shared between a handle, the submit path, and the monitor.
struct HandleShared {
    run_id: String,
    run_dir: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
    run_lock: Arc<Mutex<()>>,
    runner: Weak<Shared>,
    state: Mutex<HandleState>,
    cond: Condvar,
}

impl HandleShared {
    fn finalize(&self, status: RunStatus, exit_code: Option<i64>) {
        let mut st = self.state.lock().expect("handle state poisoned");
        if matches!(st.phase, Phase::Terminal(_)) {
            return;
        }
        st.phase = Phase::Terminal(status);
        st.exit_code = exit_code;
        drop(st);
        self.cond.notify_all();
    }

    fn mark_running(&self, pid: u32) {
        let mut st = self.state.lock().expect("handle state poisoned");
        st.phase = Phase::Running;
        st.pid = Some(pid);
    }
}

struct ActiveRecord {
    child: Child,
    handle: Arc<HandleShared>,
    deadline: Option<Instant>,
}

struct PendingItem {
    spec: LaunchSpec,
    handle: Arc<HandleShared>,
}

struct RunnerState {
    active: HashMap<PathBuf, ActiveRecord>,
    pending: VecDeque<PendingItem>,
    locks: HashMap<PathBuf, Arc<Mutex<()>>>,
}

struct Shared {
    state: Mutex<RunnerState>,
    cond: Condvar,
    stop: AtomicBool,
    max_parallel: Option<usize>,
}

impl Shared {
    fn has_capacity(&self, state: &RunnerState) -> bool {
        match self.max_parallel {
            None => true,
            Some(cap) => state.active.len() < cap,
        }
    }
}

/// Execute materialized runs as local subprocesses with an optional
/// concurrency cap.
pub struct LocalRunner {
    name: String,
    launch_factory: LaunchFactory,
    shared: Arc<Shared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl LocalRunner {
    pub fn new(
        launch: impl Into<UserLaunch>,
        max_parallel: MaxParallel,
        name: impl Into<String>,
    ) -> Result<LocalRunner> {
        let launch_factory = ensure_launch_factory(launch.into())?;
        let shared = Arc::new(Shared {
            state: Mutex::new(RunnerState {
                active: HashMap::new(),
                pending: VecDeque::new(),
                locks: HashMap::new(),
            }),
            cond: Condvar::new(),
            stop: AtomicBool::new(false),
            max_parallel: max_parallel.resolve()?,
        });

        let monitor_shared = Arc::clone(&shared);
        let name = name.into();
        let thread_name = format!("tl-local-monitor[{name}]");
        let monitor = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || monitor_loop(monitor_shared))
            .map_err(|e| Error::runner(format!("failed to start monitor thread: {e}")))?;

        Ok(LocalRunner {
            name,
            launch_factory,
            shared,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    fn run_lock(&self, run_dir: &Path) -> Arc<Mutex<()>> {
        let mut state = self.shared.state.lock().expect("runner state poisoned");
        Arc::clone(
            state
                .locks
                .entry(run_dir.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

impl Runner for LocalRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn effective_spec(&self, run: &RunMaterialized) -> Result<LaunchSpec> {
        (self.launch_factory)(run)
    }

    fn validate_spec(&self, spec: &LaunchSpec, run_dir: &Path) -> Result<()> {
        if spec.resources.gpus.is_some() {
            tracing::warn!("LocalRunner ignores resources.gpus; continuing anyway");
        }

        // Plausibility only: a missing executable is a warning, not an
        // error, because PATH at spawn time may differ.
        let cwd_abs = match &spec.cwd {
            None => run_dir.to_path_buf(),
            Some(rel) => run_dir.join(rel),
        };
        let cmd0 = &spec.cmd[0];
        let p = Path::new(cmd0);
        let found = (p.is_absolute() && p.exists())
            || cwd_abs.join(cmd0).exists()
            || find_in_path(cmd0);
        if !found {
            tracing::warn!(
                cmd = %cmd0,
                cwd = %cwd_abs.display(),
                "executable not found; process may fail to start"
            );
        }
        Ok(())
    }

    fn submit(&self, run: &RunMaterialized) -> Result<Box<dyn RunHandle>> {
        let run_dir = run.run_dir.clone();
        let run_id = run.run_id.clone();

        let base_spec = self.effective_spec(run)?;

        let stdout = base_spec
            .stdout_path
            .clone()
            .map(|p| if p.is_absolute() { p } else { run_dir.join(p) })
            .unwrap_or_else(|| default_stdout_path(&run_dir));
        let stderr = base_spec
            .stderr_path
            .clone()
            .map(|p| if p.is_absolute() { p } else { run_dir.join(p) })
            .unwrap_or_else(|| default_stderr_path(&run_dir));

        std::fs::create_dir_all(meta_dir(&run_dir))
            .map_err(|e| Error::io("failed to create run metadata directory", meta_dir(&run_dir), e))?;

        let run_lock = self.run_lock(&run_dir);

        let spec = {
            let _guard = run_lock.lock().expect("run lock poisoned");

            // Fresh logs per submission.
            for log in [&stdout, &stderr] {
                ensure_parent_dirs(log)?;
                std::fs::write(log, b"").map_err(|e| Error::io("failed to truncate log", log, e))?;
            }

            let spec = LaunchSpec {
                stdout_path: Some(stdout.clone()),
                stderr_path: Some(stderr.clone()),
                ..base_spec
            };

            validate_spec_common(&spec, &run_dir)?;
            self.validate_spec(&spec, &run_dir)?;

            let prior = RunFile::load(&run_dir).unwrap_or_else(RunFile::staged);
            let queued = prior.evolve(true, |rf| {
                rf.status = RunStatus::Queued;
                rf.submitted_at = Some(now_iso());
                rf.update_reason = Some("submit".into());
                rf.runner_kind = Some(self.name.clone());
                rf.variant_hash = Some(run.subs_fingerprint.clone());
                rf.exit_code = None;
                rf.finished_at = None;
            });
            queued.save(&run_dir)?;
            spec
        };

        let handle = Arc::new(HandleShared {
            run_id,
            run_dir: run_dir.clone(),
            stdout,
            stderr,
            run_lock,
            runner: Arc::downgrade(&self.shared),
            state: Mutex::new(HandleState {
                phase: Phase::Queued,
                pid: None,
                exit_code: None,
                cancel_requested: false,
                timed_out: false,
            }),
            cond: Condvar::new(),
        });

        let item = PendingItem {
            spec,
            handle: Arc::clone(&handle),
        };

        {
            let mut state = self.shared.state.lock().expect("runner state poisoned");
            if self.shared.has_capacity(&state) {
                if let Err(e) = spawn_item(&mut state, item) {
                    drop(state);
                    mark_spawn_failed(&handle, &e);
                    return Err(e);
                }
            } else {
                state.pending.push_back(item);
            }
        }
        self.shared.cond.notify_all();

        Ok(Box::new(LocalHandle {
            shared: handle,
        }))
    }

    fn attach(&self, run: &RunMaterialized) -> Result<Option<Box<dyn RunHandle>>> {
        if RunFile::load(&run.run_dir).is_none() {
            return Ok(None);
        }
        let handle = AttachedHandle {
            run_id: run.run_id.clone(),
            run_dir: run.run_dir.clone(),
            run_lock: self.run_lock(&run.run_dir),
        };
        Ok(Some(Box::new(handle)))
    }

    fn close(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.cond.notify_all();
        let joined = self.monitor.lock().expect("monitor handle poisoned").take();
        if let Some(thread) = joined {
            let _ = thread.join();
        }
    }
}

impl Drop for LocalRunner {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Spawn + monitor
// ---------------------------------------------------------------------------

fn spawn_item(state: &mut RunnerState, item: PendingItem) -> Result<()> {
    let handle = item.handle;
    let spec = item.spec;
    let run_dir = handle.run_dir.clone();

    let cwd = match &spec.cwd {
        None => run_dir.clone(),
        Some(rel) => run_dir.join(rel),
    };

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&handle.stdout)
        .map_err(|e| Error::io("failed to open stdout log", &handle.stdout, e))?;
    let stderr = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&handle.stderr)
        .map_err(|e| Error::io("failed to open stderr log", &handle.stderr, e))?;

    let mut command = Command::new(&spec.cmd[0]);
    command
        .args(&spec.cmd[1..])
        .current_dir(&cwd)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    platform::current().configure_child_group(&mut command);

    let child = command
        .spawn()
        .map_err(|e| Error::runner(format!("failed to spawn {:?}: {e}", spec.cmd[0])))?;
    let pid = child.id();

    update_run_file(&run_dir, &handle.run_lock, |rf| {
        rf.evolve(true, |rf| {
            rf.status = RunStatus::Running;
            rf.started_at = Some(now_iso());
            rf.update_reason = Some(format!("spawned pid {pid}"));
            rf.runner_meta
                .insert("pid".into(), serde_json::json!(pid));
        })
    })?;

    handle.mark_running(pid);
    tracing::debug!(run_id = %handle.run_id, pid, "spawned run");

    let deadline = spec
        .resources
        .time_limit_s
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    state.active.insert(
        run_dir,
        ActiveRecord {
            child,
            handle,
            deadline,
        },
    );
    Ok(())
}

fn mark_spawn_failed(handle: &HandleShared, err: &Error) {
    let result = update_run_file(&handle.run_dir, &handle.run_lock, |rf| {
        rf.evolve(true, |rf| {
            rf.status = RunStatus::Failed;
            rf.finished_at = Some(now_iso());
            rf.update_reason = Some(format!("spawn failed: {err}"));
            rf.exit_code = None;
        })
    });
    if let Err(save_err) = result {
        tracing::warn!(run_id = %handle.run_id, "failed to persist spawn failure: {save_err}");
    }
    handle.finalize(RunStatus::Failed, None);
}

fn monitor_loop(shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::SeqCst) {
        let mut state = shared.state.lock().expect("runner state poisoned");
        let now = Instant::now();

        // 1) Enforce wall-clock timeouts.
        for record in state.active.values_mut() {
            let expired = record.deadline.is_some_and(|d| now >= d);
            if !expired {
                continue;
            }
            if let Ok(None) = record.child.try_wait() {
                let pid = record.child.id();
                {
                    let mut hs = record.handle.state.lock().expect("handle state poisoned");
                    hs.timed_out = true;
                }
                // TERM now, KILL once the grace window elapses. The
                // escalation waits up to the full grace period, so it runs
                // off the monitor thread.
                std::thread::spawn(move || {
                    platform::current().graceful_kill(pid, true, DEFAULT_GRACE);
                });
                let _ = update_run_file(&record.handle.run_dir, &record.handle.run_lock, |rf| {
                    rf.evolve(true, |rf| {
                        rf.update_reason = Some("timeout".into());
                    })
                });
                tracing::warn!(run_id = %record.handle.run_id, pid, "run exceeded time limit");
            }
            // Cleared either way so signalling is not repeated.
            record.deadline = None;
        }

        // 2) Finalize exited processes.
        let mut finished: Vec<PathBuf> = Vec::new();
        for (run_dir, record) in state.active.iter_mut() {
            let status = match record.child.try_wait() {
                Ok(Some(status)) => status,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(run_id = %record.handle.run_id, "failed to poll child: {e}");
                    continue;
                }
            };

            let exit_code = status.code().map(i64::from);
            let (timed_out, cancel_requested) = {
                let hs = record.handle.state.lock().expect("handle state poisoned");
                (hs.timed_out, hs.cancel_requested)
            };
            let final_status = if timed_out {
                RunStatus::TimedOut
            } else if cancel_requested {
                RunStatus::Cancelled
            } else if exit_code == Some(0) {
                RunStatus::Succeeded
            } else {
                RunStatus::Failed
            };

            let _ = update_run_file(&record.handle.run_dir, &record.handle.run_lock, |rf| {
                rf.evolve(true, |rf| {
                    rf.status = final_status;
                    rf.finished_at = Some(now_iso());
                    rf.exit_code = exit_code;
                    rf.update_reason = Some("process exited".into());
                })
            });
            record.handle.finalize(final_status, exit_code);
            finished.push(run_dir.clone());
        }
        for run_dir in &finished {
            state.active.remove(run_dir);
            state.locks.remove(run_dir);
        }

        // 3) Dispatch pending runs while capacity allows.
        while shared.has_capacity(&state) {
            let Some(item) = state.pending.pop_front() else {
                break;
            };
            let handle = Arc::clone(&item.handle);
            if let Err(e) = spawn_item(&mut state, item) {
                tracing::warn!(run_id = %handle.run_id, "spawn from queue failed: {e}");
                mark_spawn_failed(&handle, &e);
            }
        }

        // 4) Sleep until the next deadline or a short tick, or a wakeup.
        let next_deadline = state
            .active
            .values()
            .filter_map(|r| r.deadline)
            .min()
            .map(|d| d.saturating_duration_since(now));
        let timeout = next_deadline.unwrap_or(MONITOR_TICK).min(MONITOR_TICK);
        let _ = shared
            .cond
            .wait_timeout(state, timeout)
            .expect("runner state poisoned");
    }
}

fn update_run_file(
    run_dir: &Path,
    lock: &Mutex<()>,
    f: impl FnOnce(RunFile) -> RunFile,
) -> Result<()> {
    let _guard = lock.lock().expect("run lock poisoned");
    let rf = RunFile::load(run_dir).unwrap_or_else(RunFile::staged);
    f(rf).save(run_dir)
}

fn find_in_path(cmd: &str) -> bool {
    if cmd.contains(std::path::MAIN_SEPARATOR) || cmd.contains('/') {
        return false;
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(cmd);
        if candidate.is_file() {
            return true;
        }
        #[cfg(windows)]
        {
            if dir.join(format!("{cmd}.exe")).is_file() {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Handle backed by the runner that spawned (or queued) the process.
struct LocalHandle {
    shared: Arc<HandleShared>,
}

impl RunHandle for LocalHandle {
    fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    fn external_id(&self) -> Option<String> {
        let st = self.shared.state.lock().expect("handle state poisoned");
        st.pid.map(|p| p.to_string())
    }

    fn status(&self) -> RunStatus {
        let st = self.shared.state.lock().expect("handle state poisoned");
        match st.phase {
            Phase::Queued => RunStatus::Queued,
            Phase::Running => RunStatus::Running,
            Phase::Terminal(status) => status,
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> RunStatus {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.shared.state.lock().expect("handle state poisoned");
        loop {
            if let Phase::Terminal(status) = st.phase {
                return status;
            }
            let wait_for = match deadline {
                None => MONITOR_TICK,
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return match st.phase {
                            Phase::Queued => RunStatus::Queued,
                            Phase::Running => RunStatus::Running,
                            Phase::Terminal(status) => status,
                        };
                    }
                    remaining.min(MONITOR_TICK)
                }
            };
            let (guard, _) = self
                .shared
                .cond
                .wait_timeout(st, wait_for)
                .expect("handle state poisoned");
            st = guard;
        }
    }

    fn cancel(&self, force: bool, grace: Option<Duration>, reason: Option<&str>) {
        let grace = grace.unwrap_or(DEFAULT_GRACE);
        let pid = {
            let mut st = self.shared.state.lock().expect("handle state poisoned");
            if matches!(st.phase, Phase::Terminal(_)) {
                return;
            }
            st.cancel_requested = true;
            match st.phase {
                Phase::Running => st.pid,
                Phase::Queued => None,
                Phase::Terminal(_) => unreachable!(),
            }
        };

        match pid {
            // Running: signal the process group; the monitor writes the
            // final state when the process exits.
            Some(pid) => {
                platform::current().graceful_kill(pid, force, grace);
            }
            // Queued: remove from the FIFO and finalize directly.
            None => {
                let Some(runner) = self.shared.runner.upgrade() else {
                    return;
                };
                let removed = {
                    let mut state = runner.state.lock().expect("runner state poisoned");
                    match state
                        .pending
                        .iter()
                        .position(|item| item.handle.run_dir == self.shared.run_dir)
                    {
                        Some(idx) => {
                            state.pending.remove(idx);
                            state.locks.remove(&self.shared.run_dir);
                            true
                        }
                        // Raced with dispatch; the running path applies on
                        // the next cancel call.
                        None => false,
                    }
                };
                if removed {
                    let reason = reason.unwrap_or("cancelled while queued").to_string();
                    let _ = update_run_file(&self.shared.run_dir, &self.shared.run_lock, |rf| {
                        rf.evolve(true, |rf| {
                            rf.status = RunStatus::Cancelled;
                            rf.finished_at = Some(now_iso());
                            rf.update_reason = Some(reason);
                            rf.exit_code = None;
                        })
                    });
                    self.shared.finalize(RunStatus::Cancelled, None);
                }
            }
        }
    }

    fn return_code(&self) -> Option<i64> {
        let st = self.shared.state.lock().expect("handle state poisoned");
        st.exit_code
    }

    fn stdout_path(&self) -> Option<PathBuf> {
        Some(self.shared.stdout.clone())
    }

    fn stderr_path(&self) -> Option<PathBuf> {
        Some(self.shared.stderr.clone())
    }
}

/// Handle reconstructed from `run.json` without an owned child process.
/// Status falls back to the persisted document; a `running` record whose
/// PID is no longer alive is finalized to `failed`.
struct AttachedHandle {
    run_id: String,
    run_dir: PathBuf,
    run_lock: Arc<Mutex<()>>,
}

impl AttachedHandle {
    fn read(&self) -> RunFile {
        RunFile::load(&self.run_dir).unwrap_or_default()
    }

    fn recorded_pid(rf: &RunFile) -> Option<u32> {
        rf.runner_meta
            .get("pid")
            .and_then(|v| v.as_u64())
            .and_then(|p| u32::try_from(p).ok())
    }

    fn finalize_dead_pid(&self) -> RunStatus {
        let _ = update_run_file(&self.run_dir, &self.run_lock, |rf| {
            rf.evolve(true, |rf| {
                rf.status = RunStatus::Failed;
                rf.finished_at = Some(now_iso());
                rf.update_reason = Some("pid_not_found".into());
            })
        });
        RunStatus::Failed
    }
}

impl RunHandle for AttachedHandle {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn external_id(&self) -> Option<String> {
        Self::recorded_pid(&self.read()).map(|p| p.to_string())
    }

    fn status(&self) -> RunStatus {
        let rf = self.read();
        if rf.status == RunStatus::Running {
            match Self::recorded_pid(&rf) {
                Some(pid) if platform::current().pid_alive(pid) => RunStatus::Running,
                _ => self.finalize_dead_pid(),
            }
        } else {
            rf.status
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> RunStatus {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let status = self.status();
            if status.is_terminal() {
                return status;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return status;
            }
            std::thread::sleep(ATTACH_POLL);
        }
    }

    fn cancel(&self, force: bool, grace: Option<Duration>, reason: Option<&str>) {
        let grace = grace.unwrap_or(DEFAULT_GRACE);
        let rf = self.read();
        match rf.status {
            RunStatus::Running => {
                // Only terminate a PID that is observed alive, to avoid
                // reaping a reused PID.
                match Self::recorded_pid(&rf) {
                    Some(pid) if platform::current().pid_alive(pid) => {
                        platform::current().graceful_kill(pid, force, grace);
                        let reason = reason.unwrap_or("cancelled").to_string();
                        let _ = update_run_file(&self.run_dir, &self.run_lock, |rf| {
                            rf.evolve(true, |rf| {
                                rf.status = RunStatus::Cancelled;
                                rf.finished_at = Some(now_iso());
                                rf.update_reason = Some(reason);
                            })
                        });
                    }
                    _ => {
                        self.finalize_dead_pid();
                    }
                }
            }
            RunStatus::Staged | RunStatus::Queued => {
                let reason = reason.unwrap_or("cancelled").to_string();
                let _ = update_run_file(&self.run_dir, &self.run_lock, |rf| {
                    rf.evolve(true, |rf| {
                        rf.status = RunStatus::Cancelled;
                        rf.finished_at = Some(now_iso());
                        rf.update_reason = Some(reason);
                    })
                });
            }
            _ => {}
        }
    }

    fn return_code(&self) -> Option<i64> {
        self.read().exit_code
    }

    fn stdout_path(&self) -> Option<PathBuf> {
        Some(default_stdout_path(&self.run_dir))
    }

    fn stderr_path(&self) -> Option<PathBuf> {
        Some(default_stderr_path(&self.run_dir))
    }
}
