//! The grid itself: pipeline-stage threads, variable rows, template
//! substitution, the execution fan-out builder and the batched runner.

mod fanout;
mod rows;
mod runner;
mod template;
mod thread;

pub use fanout::{
    DISPLAY_SEPARATOR, ExecutionUnit, RebuildOutcome, STORAGE_SEPARATOR, StagePick, UnitInputs,
    build_units,
};
pub use rows::{DataSet, VariableRow};
pub use runner::{Executor, RunReport, Runner, RunnerConfig};
pub use template::{RenderOutcome, render_template, variable_names};
pub use thread::{PipelineThread, StageConfig, StageKind, StageList};

use loom_snapshot::SnapshotError;

pub type GridResult<T> = Result<T, GridError>;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("stage '{0}' must keep at least one thread")]
    LastThread(StageKind),
    #[error("stage '{stage}' has no thread named '{name}'")]
    UnknownThread { stage: StageKind, name: String },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
