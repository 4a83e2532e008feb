//! Deterministic, atomic construction of run directories.
//!
//! A run is staged in a hidden temp directory sibling to its final path,
//! populated (prototype copy/link + rendered templates), then published
//! with a single rename. Metadata (`_tl/inputs.json`, `_tl/files.json`)
//! is written with the atomic-replace protocol.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use sha2::{Digest, Sha256};

use crate::constants::{files_path, inputs_path, meta_dir, FILES_SCHEMA, INPUTS_SCHEMA};
use crate::errors::{Error, Result};
use crate::fingerprint::{stable_hash_short, subs_fingerprint};
use crate::paths::RelPath;
use crate::placeholder::model::ValueLiteral;
use crate::render::{Renderer, TlRenderer};
use crate::run::io::{ensure_parent_dirs, fsync_dir_best_effort, json_load_strict, write_bytes_atomic};
use crate::run::plan::{LinkMode, RenderSpec, RunPlan};
use crate::template::Template;
use crate::SubstitutionMap;

/// One file produced in a run directory.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileRecord {
    /// Target path, relative to the run directory.
    pub target_relpath: RelPath,
    /// For rendered files the template source; for copies the original
    /// relpath.
    pub source_relpath: Option<RelPath>,
    pub was_rendered: bool,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
}

/// Immutable description of a single realized run directory.
#[derive(Debug, Clone)]
pub struct RunMaterialized {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub plan_fingerprint: String,
    pub subs_fingerprint: String,
    pub file_records: Vec<FileRecord>,
}

/// Controls where the staging directory lives and how it is published.
pub trait StagingBackend {
    fn temp_dir(&self, runs_root: &Path, run_id: &str) -> Result<PathBuf>;
    fn final_dir(&self, runs_root: &Path, run_id: &str) -> PathBuf;
    fn finalize(&self, tmp: &Path, final_dir: &Path) -> Result<()>;
}

/// Atomic staging under `runs_root`: hidden temp dir plus a rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStaging;

impl StagingBackend for DefaultStaging {
    fn temp_dir(&self, runs_root: &Path, run_id: &str) -> Result<PathBuf> {
        fs::create_dir_all(runs_root)
            .map_err(|e| Error::io("failed to create runs root", runs_root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!(".tmp-{run_id}-"))
            .tempdir_in(runs_root)
            .map_err(|e| Error::io("failed to create staging directory", runs_root, e))?;
        Ok(dir.keep())
    }

    fn final_dir(&self, runs_root: &Path, run_id: &str) -> PathBuf {
        runs_root.join(run_id)
    }

    fn finalize(&self, tmp: &Path, final_dir: &Path) -> Result<()> {
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io("failed to create runs root", parent, e))?;
        }
        fs::rename(tmp, final_dir)
            .map_err(|e| Error::io("failed to publish staged run directory", final_dir, e))?;
        fsync_dir_best_effort(final_dir.parent());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaterializeOptions {
    /// Also record copied/linked files in `files.json`, not just rendered
    /// outputs.
    pub index_copied: bool,
    pub hash_rendered: bool,
    pub hash_copied: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        MaterializeOptions {
            index_copied: false,
            hash_rendered: true,
            hash_copied: false,
        }
    }
}

/// Materialize exactly one run for the given plan + substitutions, with
/// default renderer, staging, and options.
///
/// When materializing many runs from the same plan, construct a
/// [`Materializer`] once and call [`Materializer::run`] repeatedly so
/// templates are parsed a single time.
pub fn materialize_run(plan: &RunPlan, subs: &SubstitutionMap) -> Result<RunMaterialized> {
    Materializer::new(
        plan.clone(),
        Box::new(TlRenderer),
        Box::new(DefaultStaging),
        MaterializeOptions::default(),
    )?
    .run(subs)
}

/// Materializes run directories for a fixed plan, caching parsed templates.
///
/// Templates are loaded and parsed once per instance; on-disk template
/// changes are not watched. Construct a new `Materializer` if the plan or
/// its sources change.
pub struct Materializer {
    plan: RunPlan,
    renderer: Box<dyn Renderer>,
    staging: Box<dyn StagingBackend>,
    options: MaterializeOptions,
    template_cache: Vec<(RenderSpec, Template)>,
    deny_set: HashSet<String>,
}

impl Materializer {
    pub fn new(
        plan: RunPlan,
        renderer: Box<dyn Renderer>,
        staging: Box<dyn StagingBackend>,
        options: MaterializeOptions,
    ) -> Result<Materializer> {
        let mut template_cache = Vec::with_capacity(plan.render_files.len());
        for spec in &plan.render_files {
            let src_abs = spec.source_relpath.join_under(plan.prototype_dir.path());
            if !src_abs.is_file() {
                return Err(Error::invalid_input(format!(
                    "template not found: {} under {}",
                    spec.source_relpath,
                    plan.prototype_dir.path().display()
                )));
            }
            let template = Template::from_file(&src_abs)?;
            template_cache.push((spec.clone(), template));
        }

        let deny_set = plan
            .render_files
            .iter()
            .map(|spec| spec.target_relpath.as_str().to_string())
            .collect();

        Ok(Materializer {
            plan,
            renderer,
            staging,
            options,
            template_cache,
            deny_set,
        })
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn run(&self, subs: &SubstitutionMap) -> Result<RunMaterialized> {
        // Reject non-finite scalars before any disk work: they could not be
        // recorded in inputs.json afterwards.
        validate_inputs_scalars(subs)?;

        let plan_fp = plan_fingerprint(&self.plan);
        let subs_fp = subs_fingerprint(subs);
        let run_id = make_run_id(&plan_fp, &subs_fp);

        let runs_root = self.plan.runs_root.path();
        let final_dir = self.staging.final_dir(runs_root, &run_id);
        if final_dir.exists() {
            return Err(Error::AlreadyMaterialized(final_dir));
        }

        let tmp_dir = self.staging.temp_dir(runs_root, &run_id)?;
        // Nothing is published until the rename below; a failure here
        // leaves the orphan staging directory in place for diagnosis.
        let records = self.populate(&tmp_dir, subs)?;

        self.staging.finalize(&tmp_dir, &final_dir)?;

        write_inputs_json(&final_dir, subs, &plan_fp, &subs_fp)?;

        let mut records = records;
        if self.options.index_copied {
            records.extend(index_copied_files(
                &final_dir,
                &self.plan,
                &self.deny_set,
                self.options.hash_copied,
            )?);
        }

        write_files_json(&final_dir, &records)?;

        tracing::debug!(run_id = %run_id, dir = %final_dir.display(), "materialized run");

        Ok(RunMaterialized {
            run_id,
            run_dir: final_dir,
            plan_fingerprint: plan_fp,
            subs_fingerprint: subs_fp,
            file_records: records,
        })
    }

    /// Copy the prototype and render templates into the staging directory.
    fn populate(&self, tmp_dir: &Path, subs: &SubstitutionMap) -> Result<Vec<FileRecord>> {
        copy_tree(
            self.plan.prototype_dir.path(),
            tmp_dir,
            &self.plan,
            &self.deny_set,
        )?;

        let mut records = Vec::with_capacity(self.template_cache.len());
        for (spec, template) in &self.template_cache {
            let rendered = self.renderer.render_template(template, subs)?;
            let text = apply_newline_policy(
                rendered,
                self.plan.newline.as_deref(),
                self.plan.ensure_trailing_newline,
            );

            let dst = spec.target_relpath.join_under(tmp_dir);
            ensure_parent_dirs(&dst)?;
            fs::write(&dst, text.as_bytes())
                .map_err(|e| Error::io("failed to write rendered file", &dst, e))?;

            let size = text.len() as u64;
            let sha = if self.options.hash_rendered {
                Some(sha256_file(&dst)?)
            } else {
                None
            };
            records.push(FileRecord {
                target_relpath: spec.target_relpath.clone(),
                source_relpath: Some(spec.source_relpath.clone()),
                was_rendered: true,
                size_bytes: Some(size),
                sha256: sha,
            });
        }
        Ok(records)
    }
}

/// Newline policy: normalize `\r\n`/`\r` to `\n`, convert to the configured
/// newline, and optionally append a trailing newline.
pub fn apply_newline_policy(
    text: String,
    newline: Option<&str>,
    ensure_trailing_newline: bool,
) -> String {
    let Some(newline) = newline else {
        return text;
    };
    let mut out = text.replace("\r\n", "\n").replace('\r', "\n");
    if newline != "\n" {
        out = out.replace('\n', newline);
    }
    if ensure_trailing_newline && !out.ends_with(newline) {
        out.push_str(newline);
    }
    out
}

/// Load an existing, fully materialized run directory.
///
/// `inputs.json` must carry both fingerprints and `files.json` (the
/// materialization-complete flag) must index every file.
pub fn load_materialized(run_dir: &Path) -> Result<RunMaterialized> {
    let ip = inputs_path(run_dir);
    let inputs: serde_json::Value = json_load_strict(&ip)?;

    let plan_fp = inputs
        .get("plan_fingerprint")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::metadata("inputs.json missing 'plan_fingerprint'", &ip))?
        .to_string();
    let subs_fp = inputs
        .get("subs_fingerprint")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::metadata("inputs.json missing 'subs_fingerprint'", &ip))?
        .to_string();

    let fp = files_path(run_dir);
    let raw: serde_json::Value = json_load_strict(&fp)?;
    let items = raw
        .as_array()
        .ok_or_else(|| Error::metadata("files.json must be a JSON array", &fp))?;
    let (head, tail) = items
        .split_first()
        .ok_or_else(|| Error::metadata("files.json is empty", &fp))?;
    if head.get("schema").and_then(|v| v.as_u64()).is_none() {
        return Err(Error::metadata("files.json must begin with a schema object", &fp));
    }

    let mut records = Vec::with_capacity(tail.len());
    let mut seen: HashSet<String> = HashSet::new();
    for item in tail {
        let record: FileRecord = serde_json::from_value(item.clone())
            .map_err(|e| Error::metadata(format!("malformed files.json entry: {e}"), &fp))?;
        if !seen.insert(record.target_relpath.as_str().to_string()) {
            return Err(Error::metadata(
                format!("duplicate target_relpath in files.json: {}", record.target_relpath),
                &fp,
            ));
        }
        let target_abs = record.target_relpath.join_under(run_dir);
        if !target_abs.exists() {
            return Err(Error::metadata(
                format!("files.json references a missing file: {}", record.target_relpath),
                &fp,
            ));
        }
        records.push(record);
    }

    Ok(RunMaterialized {
        run_id: make_run_id(&plan_fp, &subs_fp),
        run_dir: run_dir.to_path_buf(),
        plan_fingerprint: plan_fp,
        subs_fingerprint: subs_fp,
        file_records: records,
    })
}

/// Delete post-run prune globs from a finished run directory. Returns the
/// number of files removed.
pub fn prune_run(plan: &RunPlan, run_dir: &Path) -> Result<usize> {
    if plan.post_run_prune_globs.is_empty() {
        return Ok(0);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in &plan.post_run_prune_globs {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::invalid_input(format!("invalid prune glob {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::invalid_input(format!("failed to build prune glob set: {e}")))?;

    let mut removed = 0usize;
    for (relpath, abs) in walk_files(run_dir)? {
        if set.is_match(&relpath) {
            fs::remove_file(&abs).map_err(|e| Error::io("failed to prune file", &abs, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_inputs_scalars(subs: &SubstitutionMap) -> Result<()> {
    for (name, value) in subs {
        if let ValueLiteral::Float(f) = value {
            if !f.is_finite() {
                return Err(Error::invalid_input(format!(
                    "non-finite float not allowed in substitutions: {name} = {f}"
                )));
            }
        }
    }
    Ok(())
}

fn write_inputs_json(
    run_dir: &Path,
    subs: &SubstitutionMap,
    plan_fp: &str,
    subs_fp: &str,
) -> Result<()> {
    let params: serde_json::Map<String, serde_json::Value> = subs
        .iter()
        .map(|(name, value)| {
            let scalar = serde_json::to_value(value).expect("finite scalar serializes");
            (name.to_string(), scalar)
        })
        .collect();

    let payload = serde_json::json!({
        "schema": INPUTS_SCHEMA,
        "plan_fingerprint": plan_fp,
        "subs_fingerprint": subs_fp,
        "params": params,
    });

    crate::run::io::json_atomic_write(&inputs_path(run_dir), &payload)?;
    fsync_dir_best_effort(Some(&meta_dir(run_dir)));
    Ok(())
}

/// `files.json` is a schema-tagged array: the first element is
/// `{"schema": N}` and each following element is one file record, written
/// compactly.
fn write_files_json(run_dir: &Path, records: &[FileRecord]) -> Result<()> {
    let path = files_path(run_dir);
    let mut out = String::from("[");
    out.push_str(&format!("{{\"schema\":{FILES_SCHEMA}}}"));
    for record in records {
        out.push(',');
        out.push_str(
            &serde_json::to_string(record)
                .map_err(|e| Error::metadata(format!("failed to encode file record: {e}"), &path))?,
        );
    }
    out.push_str("]\n");

    write_bytes_atomic(&path, out.as_bytes())?;
    fsync_dir_best_effort(Some(&meta_dir(run_dir)));
    Ok(())
}

/// Copy/link a prototype tree honoring include/exclude filters and the
/// render-target deny set. Traversal is sorted for deterministic order.
fn copy_tree(src: &Path, dst: &Path, plan: &RunPlan, deny: &HashSet<String>) -> Result<()> {
    for (relpath, src_file) in walk_files(src)? {
        if !plan.selects(&relpath) {
            continue;
        }
        if deny.contains(&relpath) {
            continue;
        }

        let rel = RelPath::new(&relpath)?;
        let dst_file = rel.join_under(dst);
        ensure_parent_dirs(&dst_file)?;
        place_file(&src_file, &dst_file, plan.link_mode)?;
    }
    Ok(())
}

fn place_file(src: &Path, dst: &Path, mode: LinkMode) -> Result<()> {
    let copy = |src: &Path, dst: &Path| -> Result<()> {
        fs::copy(src, dst).map_err(|e| Error::io("failed to copy prototype file", dst, e))?;
        Ok(())
    };

    match mode {
        LinkMode::Copy => copy(src, dst),
        LinkMode::Symlink => {
            if dst.exists() {
                fs::remove_file(dst).map_err(|e| Error::io("failed to replace file", dst, e))?;
            }
            match symlink_file(src, dst) {
                Ok(()) => Ok(()),
                Err(_) => copy(src, dst),
            }
        }
        LinkMode::Hardlink => {
            if dst.exists() {
                fs::remove_file(dst).map_err(|e| Error::io("failed to replace file", dst, e))?;
            }
            match fs::hard_link(src, dst) {
                Ok(()) => Ok(()),
                Err(_) => copy(src, dst),
            }
        }
    }
}

#[cfg(unix)]
fn symlink_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(src, dst)
}

/// All regular files under `root` as sorted `(posix_relpath, abs_path)`
/// pairs.
fn walk_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries: Vec<_> = fs::read_dir(&dir)
            .map_err(|e| Error::io("failed to read directory", &dir, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| Error::io("failed to read directory entry", &dir, e))?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            let ftype = entry
                .file_type()
                .map_err(|e| Error::io("failed to stat entry", &path, e))?;
            if ftype.is_dir() {
                stack.push(path);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .map_err(|_| Error::metadata("walked outside the root", &path))?;
                let relpath = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push((relpath, path));
            }
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn index_copied_files(
    root: &Path,
    plan: &RunPlan,
    deny: &HashSet<String>,
    hash_files: bool,
) -> Result<Vec<FileRecord>> {
    let mut out = Vec::new();
    for (relpath, abs) in walk_files(root)? {
        if !plan.selects(&relpath) || deny.contains(&relpath) {
            continue;
        }
        let meta = fs::metadata(&abs).map_err(|e| Error::io("failed to stat file", &abs, e))?;
        let sha = if hash_files { Some(sha256_file(&abs)?) } else { None };
        let rel = RelPath::new(&relpath)?;
        out.push(FileRecord {
            target_relpath: rel.clone(),
            source_relpath: Some(rel),
            was_rendered: false,
            size_bytes: Some(meta.len()),
            sha256: sha,
        });
    }
    Ok(out)
}

/// Streaming SHA-256 over 1 MiB chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io("failed to open file for hashing", path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io("failed to read file for hashing", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash of the plan knobs that affect on-disk results, independent of the
/// substitution map.
pub fn plan_fingerprint(plan: &RunPlan) -> String {
    let render_pairs: Vec<(String, String)> = plan
        .render_files
        .iter()
        .map(|spec| {
            (
                spec.source_relpath.as_str().to_string(),
                spec.target_relpath.as_str().to_string(),
            )
        })
        .collect();

    let payload = serde_json::json!({
        "include": plan.include_globs,
        "exclude": plan.exclude_globs,
        "newline": plan.newline,
        "ensure_trailing_newline": plan.ensure_trailing_newline,
        "link_mode": plan.link_mode.as_str(),
        "render_pairs": render_pairs,
    });
    stable_hash_short(&payload)
}

pub fn make_run_id(plan_fp: &str, subs_fp: &str) -> String {
    format!("{plan_fp}-{subs_fp}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholder::model::ParamName;
    use crate::run::plan::{RunPlanOptions, UserRenderSpec};
    use std::collections::BTreeMap;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn subs(pairs: &[(&str, ValueLiteral)]) -> SubstitutionMap {
        pairs
            .iter()
            .map(|(k, v)| (ParamName::new(*k).unwrap(), v.clone()))
            .collect::<BTreeMap<_, _>>()
    }

    fn basic_plan(proto: &Path, runs: &Path) -> RunPlan {
        RunPlan::new(
            "sweep",
            runs,
            proto,
            vec![UserRenderSpec::Same("in.yaml".into())],
            RunPlanOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn materializes_an_atomic_run_directory() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(
            &proto.path().join("in.yaml"),
            "x: {{TL x = 0.1, type: float, domain: (0, 1)}}",
        );
        write(&proto.path().join("aux/data.txt"), "payload");

        let plan = basic_plan(proto.path(), runs.path());
        let run = materialize_run(&plan, &subs(&[("x", ValueLiteral::Float(0.25))])).unwrap();

        assert_eq!(run.run_id, format!("{}-{}", run.plan_fingerprint, run.subs_fingerprint));
        assert_eq!(run.run_dir, runs.path().join(&run.run_id));

        let rendered = fs::read_to_string(run.run_dir.join("in.yaml")).unwrap();
        assert_eq!(rendered, "x: 0.25\n");
        assert_eq!(
            fs::read_to_string(run.run_dir.join("aux/data.txt")).unwrap(),
            "payload"
        );

        // No staging leftovers under the runs root.
        let stray: Vec<_> = fs::read_dir(runs.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(stray.is_empty());

        // files.json lists the rendered file with a digest matching disk.
        assert_eq!(run.file_records.len(), 1);
        let record = &run.file_records[0];
        assert_eq!(record.target_relpath.as_str(), "in.yaml");
        assert!(record.was_rendered);
        assert_eq!(
            record.sha256.as_deref().unwrap(),
            sha256_file(&run.run_dir.join("in.yaml")).unwrap().as_str()
        );
    }

    #[test]
    fn identical_inputs_materialize_identical_outputs() {
        let proto = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");

        let runs_a = tempfile::tempdir().unwrap();
        let runs_b = tempfile::tempdir().unwrap();
        let sub = subs(&[("x", ValueLiteral::Int(2))]);

        let a = materialize_run(&basic_plan(proto.path(), runs_a.path()), &sub).unwrap();
        let b = materialize_run(&basic_plan(proto.path(), runs_b.path()), &sub).unwrap();

        assert_eq!(a.run_id, b.run_id);
        assert_eq!(
            a.file_records[0].sha256.as_deref(),
            b.file_records[0].sha256.as_deref()
        );
    }

    #[test]
    fn second_materialization_of_same_run_fails() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");

        let plan = basic_plan(proto.path(), runs.path());
        let sub = subs(&[("x", ValueLiteral::Int(2))]);
        materialize_run(&plan, &sub).unwrap();
        let err = materialize_run(&plan, &sub).unwrap_err();
        assert!(matches!(err, Error::AlreadyMaterialized(_)));
    }

    #[test]
    fn render_targets_are_not_copied_from_prototype() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");

        let plan = basic_plan(proto.path(), runs.path());
        let run = materialize_run(&plan, &SubstitutionMap::new()).unwrap();

        // The file exists only as the rendered output (defaults applied).
        assert_eq!(
            fs::read_to_string(run.run_dir.join("in.yaml")).unwrap(),
            "x: 1\n"
        );
    }

    #[test]
    fn excluded_files_are_not_copied() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");
        write(&proto.path().join(".git/HEAD"), "ref");

        let plan = basic_plan(proto.path(), runs.path());
        let run = materialize_run(&plan, &SubstitutionMap::new()).unwrap();
        assert!(!run.run_dir.join(".git").exists());
    }

    #[test]
    fn newline_policy_converts_and_appends() {
        assert_eq!(
            apply_newline_policy("a\r\nb\rc".into(), Some("\n"), true),
            "a\nb\nc\n"
        );
        assert_eq!(
            apply_newline_policy("a\nb".into(), Some("\r\n"), true),
            "a\r\nb\r\n"
        );
        assert_eq!(apply_newline_policy("a\r\nb".into(), None, true), "a\r\nb");
        assert_eq!(apply_newline_policy("a\n".into(), Some("\n"), true), "a\n");
    }

    #[test]
    fn nan_substitutions_are_rejected_before_staging() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1.0, type: float}}");

        let plan = basic_plan(proto.path(), runs.path());
        let err = materialize_run(&plan, &subs(&[("x", ValueLiteral::Float(f64::NAN))])).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
        // Nothing staged, nothing published.
        assert_eq!(fs::read_dir(runs.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_render_publishes_no_final_directory() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(
            &proto.path().join("in.yaml"),
            "x: {{TL x = 1, type: int, domain: [0, 5]}}",
        );

        let plan = basic_plan(proto.path(), runs.path());
        let err = materialize_run(&plan, &subs(&[("x", ValueLiteral::Int(99))])).unwrap_err();
        assert!(matches!(err, Error::Domain { .. }));

        // Only the orphan staging directory survives; the final path was
        // never created.
        let names: Vec<String> = fs::read_dir(runs.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
        assert!(names[0].starts_with(".tmp-"));
    }

    #[test]
    fn inputs_json_records_fingerprints_and_scalars() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}} s: {{TL s = \"v\"}}");

        let plan = basic_plan(proto.path(), runs.path());
        let run = materialize_run(
            &plan,
            &subs(&[("x", ValueLiteral::Int(3)), ("s", ValueLiteral::Str("w".into()))]),
        )
        .unwrap();

        let inputs: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(inputs_path(&run.run_dir)).unwrap()).unwrap();
        assert_eq!(inputs["plan_fingerprint"], run.plan_fingerprint.as_str());
        assert_eq!(inputs["subs_fingerprint"], run.subs_fingerprint.as_str());
        assert_eq!(inputs["params"]["x"], serde_json::json!(3));
        assert_eq!(inputs["params"]["s"], serde_json::json!("w"));
        assert_eq!(inputs["schema"], serde_json::json!(INPUTS_SCHEMA));
    }

    #[test]
    fn files_json_is_schema_tagged_and_loadable() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");
        write(&proto.path().join("keep.txt"), "data");

        let plan = basic_plan(proto.path(), runs.path());
        let mat = Materializer::new(
            plan,
            Box::new(TlRenderer),
            Box::new(DefaultStaging),
            MaterializeOptions {
                index_copied: true,
                hash_rendered: true,
                hash_copied: true,
            },
        )
        .unwrap();
        let run = mat.run(&SubstitutionMap::new()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(files_path(&run.run_dir)).unwrap()).unwrap();
        assert_eq!(raw[0]["schema"], serde_json::json!(FILES_SCHEMA));

        let loaded = load_materialized(&run.run_dir).unwrap();
        assert_eq!(loaded.run_id, run.run_id);
        assert_eq!(loaded.file_records.len(), run.file_records.len());

        let copied = loaded
            .file_records
            .iter()
            .find(|r| r.target_relpath.as_str() == "keep.txt")
            .expect("copied file indexed");
        assert!(!copied.was_rendered);
        assert_eq!(
            copied.sha256.as_deref().unwrap(),
            sha256_file(&run.run_dir.join("keep.txt")).unwrap().as_str()
        );
    }

    #[test]
    fn load_materialized_rejects_incomplete_runs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_materialized(dir.path()).is_err());
    }

    #[test]
    fn prune_run_deletes_matching_files() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");
        write(&proto.path().join("scratch/big.dat"), "xxxx");

        let plan = RunPlan::new(
            "sweep",
            runs.path(),
            proto.path(),
            vec![UserRenderSpec::Same("in.yaml".into())],
            RunPlanOptions {
                post_run_prune_globs: vec!["scratch/**".into()],
                ..RunPlanOptions::default()
            },
        )
        .unwrap();

        let run = materialize_run(&plan, &SubstitutionMap::new()).unwrap();
        assert!(run.run_dir.join("scratch/big.dat").exists());
        let removed = prune_run(&plan, &run.run_dir).unwrap();
        assert_eq!(removed, 1);
        assert!(!run.run_dir.join("scratch/big.dat").exists());
    }

    #[test]
    fn hardlink_and_symlink_modes_fall_back_to_copy_content() {
        let proto = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");
        write(&proto.path().join("data.bin"), "blob");

        for mode in [LinkMode::Hardlink, LinkMode::Symlink] {
            let runs = tempfile::tempdir().unwrap();
            let plan = RunPlan::new(
                "sweep",
                runs.path(),
                proto.path(),
                vec![UserRenderSpec::Same("in.yaml".into())],
                RunPlanOptions {
                    link_mode: mode,
                    ..RunPlanOptions::default()
                },
            )
            .unwrap();
            let run = materialize_run(&plan, &SubstitutionMap::new()).unwrap();
            assert_eq!(fs::read_to_string(run.run_dir.join("data.bin")).unwrap(), "blob");
        }
    }

    #[test]
    fn plan_fingerprint_tracks_result_affecting_knobs() {
        let proto = tempfile::tempdir().unwrap();
        let runs = tempfile::tempdir().unwrap();
        write(&proto.path().join("in.yaml"), "x: {{TL x = 1}}");

        let a = basic_plan(proto.path(), runs.path());
        let b = RunPlan::new(
            "other-name",
            runs.path(),
            proto.path(),
            vec![UserRenderSpec::Same("in.yaml".into())],
            RunPlanOptions::default(),
        )
        .unwrap();
        // The name does not affect on-disk results.
        assert_eq!(plan_fingerprint(&a), plan_fingerprint(&b));

        let c = RunPlan::new(
            "sweep",
            runs.path(),
            proto.path(),
            vec![UserRenderSpec::Same("in.yaml".into())],
            RunPlanOptions {
                newline: Some("\r\n".into()),
                ..RunPlanOptions::default()
            },
        )
        .unwrap();
        assert_ne!(plan_fingerprint(&a), plan_fingerprint(&c));
    }
}
