//! Storage backends for the loom workspace: a synchronous key/value
//! abstraction with memory and filesystem implementations, the namespaced
//! persistence layer built on top of it, and an async blob store feeding
//! the content-addressed image store.

mod blob;
mod fs_kv;
mod image;
mod mem_kv;
mod scoped;
mod util;

pub use blob::{BlobStore, DynBlobStore, FsBlobStore, MemBlobStore};
pub use fs_kv::FsKv;
pub use image::{ImageKind, ImageRecord, ImageStore};
pub use mem_kv::MemKv;
pub use scoped::{Envelope, ScopedStore, sanitize_key};
pub use util::{mint_id, now_ms};

use std::{io, path::PathBuf, sync::Arc};

pub type StoreResult<T> = Result<T, StoreError>;
pub type DynKv = Arc<dyn Kv>;

/// Synchronous key/value store. Keys are flat strings; enumeration returns
/// every key in the backend, prefix filtering is the caller's concern.
pub trait Kv: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Idempotent: removing an absent key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;
    fn keys(&self) -> StoreResult<Vec<String>>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store quota exceeded writing key '{key}' ({needed} bytes over a {capacity}-byte budget)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        capacity: usize,
    },
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image payload is not valid base64: {0}")]
    InvalidImageData(#[source] base64::DecodeError),
}

impl StoreError {
    /// True when a write failed because the backend is out of space and an
    /// eviction pass might free enough room to retry.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}
