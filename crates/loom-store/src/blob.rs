use crate::{StoreResult, io_error};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    fmt, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;

pub type DynBlobStore = Arc<dyn BlobStore>;

/// Asynchronous binary blob store keyed by opaque id. Operations may
/// suspend at the call boundary but never block the runtime for unbounded
/// time.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> StoreResult<()>;
    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>>;
    /// Idempotent: deleting an absent id is not an error.
    async fn delete(&self, id: &str) -> StoreResult<()>;
    async fn ids(&self) -> StoreResult<Vec<String>>;
}

#[derive(Clone, Default)]
pub struct MemBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl fmt::Debug for MemBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemBlobStore").finish_non_exhaustive()
    }
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.blobs.write().await.insert(id.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.blobs.write().await.remove(id);
        Ok(())
    }

    async fn ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.blobs.read().await.keys().cloned().collect())
    }
}

/// Filesystem-backed blob store: one file per id under `<root>/blobs`.
/// Ids are minted by callers from a safe alphabet, so they map directly to
/// file names.
#[derive(Clone)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl fmt::Debug for FsBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsBlobStore").field("dir", &self.dir).finish()
    }
}

impl FsBlobStore {
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = root.as_ref().join("blobs");
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, id: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let path = self.path_for(id);
        fs::write(&path, bytes).map_err(|e| io_error(path, e))
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path, err)),
        }
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(path, err)),
        }
    }

    async fn ids(&self) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }
}
