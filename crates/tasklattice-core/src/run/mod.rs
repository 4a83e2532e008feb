//! Run-side machinery: blueprints, materialization, persisted state, and
//! the atomic IO protocol they share.

pub mod io;
pub mod materialize;
pub mod plan;
pub mod state;

pub use materialize::{
    load_materialized, materialize_run, FileRecord, MaterializeOptions, Materializer,
    RunMaterialized,
};
pub use plan::{LinkMode, RenderSpec, RunPlan, RunPlanOptions, UserRenderSpec};
pub use state::{RunFile, RunStatus};
