use crate::{DynKv, StoreResult, util::now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Versioned wire envelope around every persisted value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "_v")]
    pub version: u32,
    #[serde(rename = "_t")]
    pub timestamp: u64,
    pub data: Value,
}

/// Replace every character outside `[A-Za-z0-9-_]` with `_` so composed
/// keys stay safe for the backend charset and cannot collide with the
/// layer's own delimiters.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Page-scoped, schema-versioned persistence layer over a synchronous
/// key/value backend.
///
/// Full key shape: `{prefix}_{page_id}_{sanitized_key}_v{version}`.
/// Values are wrapped in an [`Envelope`]; reads treat a version mismatch
/// or unparseable payload as absence (the stale entry is deleted), never
/// as an error. Writes that hit the backend quota evict the oldest 20% of
/// this layer's entries and retry exactly once.
#[derive(Clone)]
pub struct ScopedStore {
    kv: DynKv,
    prefix: String,
    page_id: String,
    version: u32,
}

impl std::fmt::Debug for ScopedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStore")
            .field("prefix", &self.prefix)
            .field("page_id", &self.page_id)
            .field("version", &self.version)
            .finish()
    }
}

impl ScopedStore {
    pub fn new(kv: DynKv, prefix: impl Into<String>, page_id: impl Into<String>, version: u32) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
            page_id: page_id.into(),
            version,
        }
    }

    pub fn kv(&self) -> &DynKv {
        &self.kv
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn page_id(&self) -> &str {
        &self.page_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Prefix shared by every key this layer owns.
    pub fn page_prefix(&self) -> String {
        format!("{}_{}_", self.prefix, self.page_id)
    }

    fn version_suffix(&self) -> String {
        format!("_v{}", self.version)
    }

    /// Compose the full backend key for a logical key.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}{}", self.page_prefix(), sanitize_key(key), self.version_suffix())
    }

    /// Read a value. Absent, stale-version and unparseable entries all
    /// come back as `None`; the latter two are deleted on the way out.
    pub fn get_item(&self, key: &str) -> StoreResult<Option<Value>> {
        let full = self.full_key(key);
        let Some(raw) = self.kv.get(&full)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) if envelope.version == self.version => Ok(Some(envelope.data)),
            Ok(envelope) => {
                debug!(key = %full, stored = envelope.version, expected = self.version,
                       "dropping stale-version entry");
                self.kv.remove(&full)?;
                Ok(None)
            }
            Err(error) => {
                debug!(key = %full, %error, "dropping unparseable entry");
                self.kv.remove(&full)?;
                Ok(None)
            }
        }
    }

    /// Write a value inside a fresh envelope. A quota failure triggers one
    /// eviction pass over this layer's entries and a single retry.
    pub fn set_item(&self, key: &str, value: &Value) -> StoreResult<()> {
        let full = self.full_key(key);
        let envelope = Envelope {
            version: self.version,
            timestamp: now_ms(),
            data: value.clone(),
        };
        let raw = serde_json::to_string(&envelope)?;
        match self.kv.set(&full, &raw) {
            Ok(()) => Ok(()),
            Err(err) if err.is_quota_exceeded() => {
                warn!(key = %full, "quota exceeded, evicting oldest entries and retrying");
                self.evict_oldest()?;
                self.kv.set(&full, &raw)
            }
            Err(err) => Err(err),
        }
    }

    /// Idempotent delete.
    pub fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.kv.remove(&self.full_key(key))
    }

    /// Delete every key under this layer's page prefix, any version.
    pub fn cleanup_page(&self) -> StoreResult<()> {
        for key in self.page_keys()? {
            self.kv.remove(&key)?;
        }
        Ok(())
    }

    /// Enumerate full keys under this layer's prefix carrying the current
    /// version suffix. Stale-version keys are excluded but not deleted.
    pub fn all_keys(&self) -> StoreResult<Vec<String>> {
        let suffix = self.version_suffix();
        Ok(self
            .page_keys()?
            .into_iter()
            .filter(|k| k.ends_with(&suffix))
            .collect())
    }

    /// Every full key under the page prefix, regardless of version.
    pub fn page_keys(&self) -> StoreResult<Vec<String>> {
        let prefix = self.page_prefix();
        Ok(self
            .kv
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect())
    }

    /// Drop the oldest 20% (by envelope timestamp, ascending) of this
    /// layer's entries. Entries whose envelope cannot be parsed sort first.
    fn evict_oldest(&self) -> StoreResult<()> {
        let keys = self.page_keys()?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut stamped: Vec<(u64, String)> = Vec::with_capacity(keys.len());
        for key in keys {
            let timestamp = self
                .kv
                .get(&key)?
                .and_then(|raw| serde_json::from_str::<Envelope>(&raw).ok())
                .map(|e| e.timestamp)
                .unwrap_or(0);
            stamped.push((timestamp, key));
        }
        stamped.sort();
        let victims = (stamped.len() as f64 * 0.2).ceil() as usize;
        for (_, key) in stamped.into_iter().take(victims) {
            debug!(key = %key, "evicting entry");
            self.kv.remove(&key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Kv, MemKv};
    use serde_json::json;
    use std::sync::Arc;

    fn store(kv: MemKv) -> ScopedStore {
        ScopedStore::new(Arc::new(kv), "loom", "page-1", 1)
    }

    #[test]
    fn sanitizes_keys_before_composing() {
        let s = store(MemKv::new());
        assert_eq!(s.full_key("model: gpt 4!"), "loom_page-1_model__gpt_4__v1");
    }

    #[test]
    fn round_trips_values_through_the_envelope() {
        let s = store(MemKv::new());
        s.set_item("cell", &json!({"text": "hello"})).unwrap();
        assert_eq!(s.get_item("cell").unwrap(), Some(json!({"text": "hello"})));
    }

    #[test]
    fn stale_version_reads_as_absent_and_is_deleted() {
        let kv = MemKv::new();
        let old = ScopedStore::new(Arc::new(kv.clone()), "loom", "page-1", 1);
        old.set_item("cell", &json!(1)).unwrap();

        let new = ScopedStore::new(Arc::new(kv.clone()), "loom", "page-1", 2);
        // Different version suffix entirely, so the v1 record is simply not
        // visible; a same-key write under v2 coexists until cleanup.
        assert_eq!(new.get_item("cell").unwrap(), None);

        // A record written under the current suffix but carrying a stale
        // envelope version is deleted on read.
        kv.set(
            &new.full_key("cell"),
            &serde_json::to_string(&Envelope {
                version: 1,
                timestamp: 42,
                data: json!(1),
            })
            .unwrap(),
        )
        .unwrap();
        assert_eq!(new.get_item("cell").unwrap(), None);
        assert_eq!(kv.get(&new.full_key("cell")).unwrap(), None);
    }

    #[test]
    fn corrupt_payload_reads_as_absent_and_is_deleted() {
        let kv = MemKv::new();
        let s = ScopedStore::new(Arc::new(kv.clone()), "loom", "page-1", 1);
        kv.set(&s.full_key("cell"), "{not json").unwrap();
        assert_eq!(s.get_item("cell").unwrap(), None);
        assert_eq!(kv.get(&s.full_key("cell")).unwrap(), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let s = store(MemKv::new());
        s.remove_item("missing").unwrap();
        s.set_item("k", &json!(true)).unwrap();
        s.remove_item("k").unwrap();
        s.remove_item("k").unwrap();
        assert_eq!(s.get_item("k").unwrap(), None);
    }

    #[test]
    fn cleanup_page_only_touches_this_page() {
        let kv = MemKv::new();
        let page_a = ScopedStore::new(Arc::new(kv.clone()), "loom", "a", 1);
        let page_b = ScopedStore::new(Arc::new(kv.clone()), "loom", "b", 1);
        page_a.set_item("x", &json!(1)).unwrap();
        page_b.set_item("x", &json!(2)).unwrap();
        page_a.cleanup_page().unwrap();
        assert_eq!(page_a.get_item("x").unwrap(), None);
        assert_eq!(page_b.get_item("x").unwrap(), Some(json!(2)));
    }

    #[test]
    fn all_keys_excludes_other_versions() {
        let kv = MemKv::new();
        let v1 = ScopedStore::new(Arc::new(kv.clone()), "loom", "p", 1);
        let v2 = ScopedStore::new(Arc::new(kv.clone()), "loom", "p", 2);
        v1.set_item("a", &json!(1)).unwrap();
        v2.set_item("b", &json!(2)).unwrap();
        assert_eq!(v1.all_keys().unwrap(), vec![v1.full_key("a")]);
        assert_eq!(v2.all_keys().unwrap(), vec![v2.full_key("b")]);
    }

    #[test]
    fn quota_failure_evicts_oldest_fifth_and_retries() {
        // Budget sized so ten entries fit and the eleventh does not.
        let kv = MemKv::with_quota(900);
        let s = ScopedStore::new(Arc::new(kv.clone()), "loom", "p", 1);
        for i in 0..10 {
            s.set_item(&format!("k{i}"), &json!("x".repeat(40))).unwrap();
        }
        let before = s.all_keys().unwrap().len();
        assert_eq!(before, 10);

        s.set_item("overflow", &json!("x".repeat(40))).unwrap();

        let keys = s.all_keys().unwrap();
        // Two oldest entries evicted (ceil(10 * 0.2)), new entry landed.
        assert_eq!(keys.len(), 9);
        assert!(keys.contains(&s.full_key("overflow")));
        assert_eq!(s.get_item("k0").unwrap(), None);
        assert_eq!(s.get_item("k1").unwrap(), None);
        assert!(s.get_item("k2").unwrap().is_some());
    }
}
