//! Materialize-then-execute pipeline through the local runner: concurrent
//! submission, persisted lifecycle, timeout and cancellation behavior.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use tasklattice_core::constants::{run_file_path, RUN_METADATA_DIR};
use tasklattice_core::run::plan::UserRenderSpec;
use tasklattice_core::{
    materialize_run, LaunchSpec, LocalRunner, MaxParallel, ParamName, RunPlan, RunPlanOptions,
    RunStatus, Runner, SubstitutionMap, ValueLiteral,
};

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn one_param_subs(name: &str, value: ValueLiteral) -> SubstitutionMap {
    [(ParamName::new(name).unwrap(), value)]
        .into_iter()
        .collect::<BTreeMap<_, _>>()
}

fn sweep_plan(proto: &Path, runs: &Path) -> RunPlan {
    RunPlan::new(
        "exec",
        runs,
        proto,
        vec![UserRenderSpec::Same("input.txt".into())],
        RunPlanOptions::default(),
    )
    .unwrap()
}

#[test]
fn sweep_executes_each_run_and_persists_lifecycle() -> anyhow::Result<()> {
    let proto = tempfile::tempdir()?;
    let runs = tempfile::tempdir()?;
    write(&proto.path().join("input.txt"), "n = {{TL n = 0, type: int}}");

    let plan = sweep_plan(proto.path(), runs.path());
    let runner = LocalRunner::new("sh -c 'cat input.txt'", MaxParallel::Fixed(2), "local")?;

    let mut handles = Vec::new();
    for n in [1i64, 2, 3] {
        let run = materialize_run(&plan, &one_param_subs("n", ValueLiteral::Int(n)))?;
        handles.push((n, run.run_dir.clone(), runner.submit(&run)?));
    }

    for (n, run_dir, handle) in &handles {
        let status = handle.wait(Some(Duration::from_secs(30)));
        assert_eq!(status, RunStatus::Succeeded, "run n={n}");
        assert_eq!(handle.return_code(), Some(0));

        // The subprocess saw the rendered input.
        let stdout = fs::read_to_string(handle.stdout_path().unwrap())?;
        assert_eq!(stdout, format!("n = {n}\n"));

        // Lifecycle persisted under the metadata directory.
        let state_path = run_file_path(run_dir);
        assert!(state_path.starts_with(run_dir.join(RUN_METADATA_DIR)));
        let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&state_path)?)?;
        assert_eq!(doc["status"], "succeeded");
        assert_eq!(doc["exit_code"], 0);
        assert!(doc["submitted_at"].is_string());
        assert!(doc["started_at"].is_string());
        assert!(doc["finished_at"].is_string());
    }

    runner.close();
    Ok(())
}

#[test]
fn timeout_terminates_the_process_group() -> anyhow::Result<()> {
    let proto = tempfile::tempdir()?;
    let runs = tempfile::tempdir()?;
    write(&proto.path().join("input.txt"), "tag = {{TL tag = \"slow\"}}");

    let plan = sweep_plan(proto.path(), runs.path());
    let mut spec = LaunchSpec::from_shell("sh -c 'sleep 30'")?;
    spec.resources.time_limit_s = Some(1);
    let runner = LocalRunner::new(spec, MaxParallel::Fixed(1), "local")?;

    let run = materialize_run(&plan, &SubstitutionMap::new())?;
    let handle = runner.submit(&run)?;

    let status = handle.wait(Some(Duration::from_secs(20)));
    assert_eq!(status, RunStatus::TimedOut);

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_file_path(&run.run_dir))?)?;
    assert_eq!(doc["status"], "timed_out");
    // Killed by signal: no native exit code.
    assert_eq!(doc["exit_code"], serde_json::Value::Null);
    assert!(doc["finished_at"].is_string());

    runner.close();
    Ok(())
}

#[test]
fn timeout_escalates_to_kill_when_sigterm_is_ignored() -> anyhow::Result<()> {
    let proto = tempfile::tempdir()?;
    let runs = tempfile::tempdir()?;
    write(&proto.path().join("input.txt"), "tag = {{TL tag = \"stuck\"}}");

    let plan = sweep_plan(proto.path(), runs.path());
    // The shell ignores SIGTERM and its child inherits the disposition, so
    // only the KILL escalation can reap this group.
    let mut spec = LaunchSpec::from_shell("sh -c 'trap \"\" TERM; sleep 30'")?;
    spec.resources.time_limit_s = Some(1);
    let runner = LocalRunner::new(spec, MaxParallel::Fixed(1), "local")?;

    let run = materialize_run(&plan, &SubstitutionMap::new())?;
    let submitted = Instant::now();
    let handle = runner.submit(&run)?;

    let status = handle.wait(Some(Duration::from_secs(25)));
    assert_eq!(status, RunStatus::TimedOut);
    // Reaped within time limit + grace + slack, well before the sleep ends.
    assert!(submitted.elapsed() < Duration::from_secs(20));

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_file_path(&run.run_dir))?)?;
    assert_eq!(doc["status"], "timed_out");
    assert_eq!(doc["exit_code"], serde_json::Value::Null);
    assert!(doc["finished_at"].is_string());

    runner.close();
    Ok(())
}

#[test]
fn cancelling_a_queued_run_skips_execution() -> anyhow::Result<()> {
    let proto = tempfile::tempdir()?;
    let runs = tempfile::tempdir()?;
    write(&proto.path().join("input.txt"), "tag = {{TL tag = \"q\"}}");

    let plan = sweep_plan(proto.path(), runs.path());
    let runner = LocalRunner::new("sh -c 'sleep 30'", MaxParallel::Fixed(1), "local")?;

    let blocker = materialize_run(&plan, &one_param_subs("tag", ValueLiteral::Str("a".into())))?;
    let queued = materialize_run(&plan, &one_param_subs("tag", ValueLiteral::Str("b".into())))?;

    let first = runner.submit(&blocker)?;
    let second = runner.submit(&queued)?;
    assert_eq!(second.status(), RunStatus::Queued);

    second.cancel(false, None, None);
    assert_eq!(second.wait(Some(Duration::from_secs(5))), RunStatus::Cancelled);

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_file_path(&queued.run_dir))?)?;
    assert_eq!(doc["status"], "cancelled");
    assert_eq!(doc["started_at"], serde_json::Value::Null);

    first.cancel(true, Some(Duration::from_secs(1)), None);
    assert!(first.wait(Some(Duration::from_secs(20))).is_terminal());

    runner.close();
    Ok(())
}
