//! TaskLattice core: a parameter-sweep engine.
//!
//! A *prototype* directory containing typed `{{TL …}}` placeholders is
//! expanded into one *run* directory per point of a parameter lattice;
//! each run executes under a pluggable runner that persists its lifecycle
//! to `_tl/run.json`.
//!
//! The pipeline, leaves first:
//!
//! - [`source`]: immutable source buffers with spans and line/column
//!   indexing.
//! - [`placeholder`]: the `{{TL name = default, …}}` grammar, scanner,
//!   parser, and type/domain resolver.
//! - [`profile`]: per-format quoting/escaping policy (JSON, YAML, TOML,
//!   INI, properties, dotenv, XML).
//! - [`template`] and [`render`]: parsed templates and the pure
//!   profile-aware substitution function.
//! - [`lattice`]: lazy product/zip/derive/filter/constrained pipelines of
//!   substitution maps with deterministic enumeration and variant ids.
//! - [`run`]: run plans, atomic materialization, and the persisted run
//!   state machine.
//! - [`runners`]: launch specifications and the admission-controlled local
//!   subprocess runner.

pub mod constants;
pub mod errors;
pub mod fingerprint;
pub mod lattice;
pub mod paths;
pub mod placeholder;
pub mod platform;
pub mod profile;
pub mod render;
pub mod run;
pub mod runners;
pub mod source;
pub mod template;

use std::collections::BTreeMap;

pub use errors::{Error, Result};
pub use lattice::{ConflictPolicy, Lattice};
pub use placeholder::{Domain, EffectiveType, ParamName, ValueLiteral};
pub use profile::{clone_profile, get_profile, infer_profile, Profile};
pub use render::{render, render_report, Renderer, TlRenderer};
pub use run::{
    load_materialized, materialize_run, LinkMode, Materializer, RunFile, RunMaterialized, RunPlan,
    RunPlanOptions, RunStatus,
};
pub use runners::local::{LocalRunner, MaxParallel};
pub use runners::{LaunchSpec, Resources, RunHandle, Runner, UserLaunch};
pub use source::{Source, SourceSpan};
pub use template::Template;

/// Concrete parameter values for one run. Keys are a subset of a
/// template's parameters; missing keys take their defaults.
pub type SubstitutionMap = BTreeMap<ParamName, ValueLiteral>;
