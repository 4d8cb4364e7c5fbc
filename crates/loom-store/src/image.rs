use crate::{
    DynBlobStore, StoreError, StoreResult,
    util::{mint_id, now_ms},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use loom_hash::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Generated,
    Reference,
}

/// One stored image payload. Owned exclusively by the [`ImageStore`];
/// callers hold only the string id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    pub hash: String,
    pub data: String,
    pub timestamp: u64,
    pub ref_count: u32,
    pub kind: ImageKind,
}

/// Content-addressed image store over an async blob backend. Byte-identical
/// payloads share one record through reference counting; deletion is
/// explicit (release to zero, or the age sweep), never garbage-collected.
///
/// Lookups by hash are full-table scans. Record counts are expected to stay
/// session-small; this is an accepted scalability limit.
#[derive(Clone)]
pub struct ImageStore {
    blobs: DynBlobStore,
    // Guards the read-modify-write span on ref_count updates.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore").finish_non_exhaustive()
    }
}

impl ImageStore {
    pub fn new(blobs: DynBlobStore) -> Self {
        Self {
            blobs,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store a base64 image payload (an optional `data:...;base64,` prefix
    /// is tolerated). A payload whose decoded bytes match an existing
    /// record increments that record's ref count and returns its id.
    pub async fn save_image(&self, data: &str, kind: ImageKind) -> StoreResult<String> {
        let bytes = decode_payload(data)?;
        let hash = Hash::of_bytes(&bytes).to_hex();

        let _guard = self.write_lock.lock().await;
        if let Some(mut existing) = self.find_by_hash(&hash).await? {
            existing.ref_count += 1;
            let id = existing.id.clone();
            self.persist(&existing).await?;
            debug!(id = %id, ref_count = existing.ref_count, "deduplicated image save");
            return Ok(id);
        }

        let record = ImageRecord {
            id: mint_id("img"),
            hash,
            data: data.to_string(),
            timestamp: now_ms(),
            ref_count: 1,
            kind,
        };
        self.persist(&record).await?;
        Ok(record.id)
    }

    /// Fetch a payload by id. No side effects.
    pub async fn get_image(&self, id: &str) -> StoreResult<Option<String>> {
        Ok(self.load(id).await?.map(|record| record.data))
    }

    /// Drop one reference. At zero the record is deleted. Releasing an
    /// unknown id is a no-op.
    pub async fn release_image(&self, id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let Some(mut record) = self.load(id).await? else {
            return Ok(());
        };
        if record.ref_count <= 1 {
            debug!(id = %id, "last reference released, deleting image");
            self.blobs.delete(id).await
        } else {
            record.ref_count -= 1;
            self.persist(&record).await
        }
    }

    /// Unconditional age sweep: delete every record older than the cutoff
    /// regardless of ref count. Backstop against leaked references.
    /// Returns the number of records deleted.
    pub async fn clear_old_images(&self, max_age_ms: u64) -> StoreResult<usize> {
        let cutoff = now_ms().saturating_sub(max_age_ms);
        let _guard = self.write_lock.lock().await;
        let mut deleted = 0;
        for id in self.blobs.ids().await? {
            if let Some(record) = self.load(&id).await?
                && record.timestamp < cutoff
            {
                self.blobs.delete(&id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub async fn all_image_ids(&self) -> StoreResult<Vec<String>> {
        self.blobs.ids().await
    }

    /// Full-table scan for a record with the given content hash.
    pub async fn find_by_hash(&self, hash: &str) -> StoreResult<Option<ImageRecord>> {
        for id in self.blobs.ids().await? {
            if let Some(record) = self.load(&id).await?
                && record.hash == hash
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn load(&self, id: &str) -> StoreResult<Option<ImageRecord>> {
        let Some(bytes) = self.blobs.get(id).await? else {
            return Ok(None);
        };
        // Unparseable records are treated as absent rather than fatal.
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                debug!(id = %id, %error, "skipping unparseable image record");
                Ok(None)
            }
        }
    }

    async fn persist(&self, record: &ImageRecord) -> StoreResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.blobs.put(&record.id, bytes).await
    }
}

fn decode_payload(data: &str) -> StoreResult<Vec<u8>> {
    let encoded = match data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    BASE64
        .decode(encoded.trim())
        .map_err(StoreError::InvalidImageData)
}
