use crate::{Kv, StoreError, StoreResult};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// In-memory key/value backend. An optional byte quota caps the summed
/// size of keys plus values so callers can exercise the eviction path.
#[derive(Clone, Default)]
pub struct MemKv {
    entries: Arc<RwLock<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl std::fmt::Debug for MemKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemKv")
            .field("entries", &self.entries.read().unwrap().len())
            .field("quota_bytes", &self.quota_bytes)
            .finish()
    }
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Arc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used_bytes(entries: &HashMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl Kv for MemKv {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().unwrap();
        if let Some(capacity) = self.quota_bytes {
            let current = Self::used_bytes(&entries);
            let replaced = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let needed = current - replaced + key.len() + value.len();
            if needed > capacity {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed: needed - capacity,
                    capacity,
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.entries.read().unwrap().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove_round_trip() {
        let kv = MemKv::new();
        kv.set("a", "1").unwrap();
        assert_eq!(kv.get("a").unwrap().as_deref(), Some("1"));
        kv.remove("a").unwrap();
        assert_eq!(kv.get("a").unwrap(), None);
        // Removing again is a no-op.
        kv.remove("a").unwrap();
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let kv = MemKv::with_quota(16);
        kv.set("k", "12345").unwrap();
        let err = kv.set("other", "0123456789abcdef").unwrap_err();
        assert!(err.is_quota_exceeded());
        // Existing data is untouched by a failed write.
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("12345"));
    }

    #[test]
    fn overwrites_count_replaced_bytes_against_quota() {
        let kv = MemKv::with_quota(10);
        kv.set("k", "123456789").unwrap();
        // Same key, same size: replacement fits even though the store is full.
        kv.set("k", "987654321").unwrap();
    }
}
