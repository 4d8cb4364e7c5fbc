//! Snapshot model, lock/unlock state machine, structural diffing and the
//! recovery/backup manager for page-scoped persisted state.
//!
//! A "lock" is nothing but a persisted snapshot record: presence of the
//! record under the entity's key *is* the locked state. Unlocking deletes
//! the record. No separate boolean exists, so lock state can never drift
//! out of sync with storage.

mod diff;
mod lock;
mod model;
mod recovery;

pub use diff::{Comparison, Diff, DiffKind, DiffSummary, create_comparison, deep_compare};
pub use lock::{CellLocks, CellRef, Entry, ModuleLocks, ThreadLocks};
pub use model::{
    CellSnapshot, ModuleSnapshot, Snapshot, SnapshotMeta, ThreadSnapshot, payload_of,
    validate_record,
};
pub use recovery::{MigrateReport, RecoveryManager, RecoveryReport, RestoreReport};

use loom_store::StoreError;

/// Base prefix shared by every persisted snapshot key; the global quota
/// sweep targets this.
pub const SNAPSHOT_PREFIX: &str = "loomsnap";
/// Per-granularity key prefixes. Identical lock logic, distinct namespaces.
pub const THREAD_LOCK_PREFIX: &str = "loomsnap_thread";
pub const CELL_LOCK_PREFIX: &str = "loomsnap_cell";
pub const MODULE_LOCK_PREFIX: &str = "loomsnap_module";
/// Current snapshot schema version, written into both the storage envelope
/// and `metadata.version`.
pub const SNAPSHOT_VERSION: u32 = 1;

pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
