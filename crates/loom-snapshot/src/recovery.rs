use crate::{
    CELL_LOCK_PREFIX, MODULE_LOCK_PREFIX, SNAPSHOT_PREFIX, SNAPSHOT_VERSION, SnapshotResult,
    THREAD_LOCK_PREFIX,
    model::{payload_of, validate_record},
};
use loom_hash::content_hash;
use loom_store::{DynKv, Envelope, mint_id, now_ms};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub success: bool,
    pub recovered: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub success: bool,
    pub restored: usize,
    pub failed: usize,
    /// `(key, message)` pairs; a malformed backup reports a single entry
    /// keyed `"backup"`.
    pub errors: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrateReport {
    pub migrated: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Whole-namespace maintenance over a page's persisted snapshots, without
/// knowledge of the individual record schemas: structural repair, export
/// and import, version migration, and the global quota sweep.
#[derive(Clone)]
pub struct RecoveryManager {
    kv: DynKv,
    page_id: String,
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("page_id", &self.page_id)
            .finish()
    }
}

impl RecoveryManager {
    pub fn new(kv: DynKv, page_id: impl Into<String>) -> Self {
        Self {
            kv,
            page_id: page_id.into(),
        }
    }

    /// Every full key under this page's snapshot namespace, all
    /// granularities, any version.
    pub fn page_keys(&self) -> SnapshotResult<Vec<String>> {
        let prefixes = [THREAD_LOCK_PREFIX, CELL_LOCK_PREFIX, MODULE_LOCK_PREFIX]
            .map(|p| format!("{p}_{}_", self.page_id));
        let mut keys: Vec<String> = self
            .kv
            .keys()?
            .into_iter()
            .filter(|k| prefixes.iter().any(|p| k.starts_with(p.as_str())))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Validate every record; patch repairable defects (missing metadata,
    /// hash, timestamp, version or id) with best-effort defaults and
    /// re-validate; delete what remains invalid. Idempotent: a healthy
    /// namespace recovers everything and fails nothing.
    pub fn recover(&self) -> SnapshotResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for key in self.page_keys()? {
            let Some(raw) = self.kv.get(&key)? else {
                continue;
            };
            let envelope = match serde_json::from_str::<Envelope>(&raw) {
                Ok(envelope) => envelope,
                Err(error) => {
                    warn!(key = %key, %error, "deleting unparseable snapshot record");
                    self.kv.remove(&key)?;
                    report.failed += 1;
                    report.errors.push(format!("{key}: unparseable record"));
                    continue;
                }
            };
            if validate_record(&envelope.data) {
                report.recovered += 1;
                continue;
            }
            match repair_record(&envelope.data, &self.page_id) {
                Some(repaired) if validate_record(&repaired) => {
                    debug!(key = %key, "repaired snapshot record");
                    let patched = Envelope {
                        version: envelope.version,
                        timestamp: envelope.timestamp,
                        data: repaired,
                    };
                    self.kv.set(&key, &serde_json::to_string(&patched)?)?;
                    report.recovered += 1;
                }
                _ => {
                    warn!(key = %key, "deleting unrepairable snapshot record");
                    self.kv.remove(&key)?;
                    report.failed += 1;
                    report.errors.push(format!("{key}: unrepairable record"));
                }
            }
        }
        report.success = report.failed == 0;
        Ok(report)
    }

    /// Export every parseable record as a JSON backup envelope. Corrupted
    /// entries are silently skipped.
    pub fn backup(&self) -> SnapshotResult<String> {
        let mut snapshots = BTreeMap::new();
        for key in self.page_keys()? {
            let Some(raw) = self.kv.get(&key)? else {
                continue;
            };
            if let Ok(envelope) = serde_json::from_str::<Envelope>(&raw) {
                snapshots.insert(key, envelope.data);
            }
        }
        Ok(serde_json::to_string(&json!({
            "version": SNAPSHOT_VERSION,
            "timestamp": now_ms(),
            "snapshots": snapshots,
        }))?)
    }

    /// Import a backup produced by [`backup`](Self::backup). A backup
    /// without a `snapshots` map fails wholesale; individual invalid
    /// entries are rejected without aborting the rest.
    pub fn restore(&self, backup: &str) -> SnapshotResult<RestoreReport> {
        let mut report = RestoreReport::default();
        let parsed: Value = match serde_json::from_str(backup) {
            Ok(value) => value,
            Err(error) => {
                report.errors.push(("backup".into(), error.to_string()));
                return Ok(report);
            }
        };
        let Some(snapshots) = parsed.get("snapshots").and_then(Value::as_object) else {
            report
                .errors
                .push(("backup".into(), "missing 'snapshots' map".into()));
            return Ok(report);
        };
        for (key, record) in snapshots {
            if !validate_record(record) {
                report.failed += 1;
                report
                    .errors
                    .push((key.clone(), "record failed validation".into()));
                continue;
            }
            let envelope = Envelope {
                version: envelope_version_of(key),
                timestamp: now_ms(),
                data: record.clone(),
            };
            self.kv.set(key, &serde_json::to_string(&envelope)?)?;
            report.restored += 1;
        }
        report.success = report.failed == 0;
        Ok(report)
    }

    /// Rewrite `metadata.version` on records matching `from`. The content
    /// hash covers only the payload, so it is recomputed but stays stable.
    pub fn migrate(&self, from: u32, to: u32) -> SnapshotResult<MigrateReport> {
        let mut report = MigrateReport::default();
        for key in self.page_keys()? {
            let Some(raw) = self.kv.get(&key)? else {
                continue;
            };
            let Ok(mut envelope) = serde_json::from_str::<Envelope>(&raw) else {
                continue;
            };
            let version = envelope
                .data
                .get("metadata")
                .and_then(|m| m.get("version"))
                .and_then(Value::as_u64);
            if version != Some(from as u64) {
                continue;
            }
            let Some(payload) = payload_of(&envelope.data) else {
                report.failed += 1;
                report.errors.push(format!("{key}: record has no payload"));
                continue;
            };
            let hash = match content_hash(payload) {
                Ok(hash) => hash,
                Err(error) => {
                    report.failed += 1;
                    report.errors.push(format!("{key}: {error}"));
                    continue;
                }
            };
            let Some(meta) = envelope
                .data
                .get_mut("metadata")
                .and_then(Value::as_object_mut)
            else {
                report.failed += 1;
                report.errors.push(format!("{key}: metadata is not an object"));
                continue;
            };
            meta.insert("version".into(), json!(to));
            meta.insert("hash".into(), json!(hash));
            self.kv.set(&key, &serde_json::to_string(&envelope)?)?;
            report.migrated += 1;
        }
        Ok(report)
    }

    /// Global quota handler: across the *entire* backend (every page),
    /// delete the oldest 20% of snapshot-prefixed entries by envelope
    /// timestamp. The caller is expected to retry its write afterwards.
    pub fn handle_quota_exceeded(&self) -> SnapshotResult<usize> {
        let keys: Vec<String> = self
            .kv
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(SNAPSHOT_PREFIX))
            .collect();
        if keys.is_empty() {
            return Ok(0);
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
        for (_, key) in stamped.iter().take(victims) {
            warn!(key = %key, "quota sweep deleting snapshot entry");
            self.kv.remove(key)?;
        }
        Ok(victims)
    }
}

/// Best-effort structural repair. Returns `None` when the record has no
/// payload to re-hash; the caller re-validates the result.
fn repair_record(record: &Value, page_id: &str) -> Option<Value> {
    let payload = payload_of(record)?.clone();
    let hash = content_hash(&payload).ok()?;

    let mut record = record.clone();
    let root = record.as_object_mut()?;
    // Metadata absent or not an object: start it over.
    if !matches!(root.get("metadata"), Some(Value::Object(_))) {
        root.insert("metadata".into(), Value::Object(Map::new()));
    }
    let meta = root.get_mut("metadata")?.as_object_mut()?;
    let id_missing = !meta
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if id_missing {
        meta.insert("id".into(), json!(mint_id("snap")));
    }
    if !meta.get("timestamp").and_then(Value::as_u64).is_some_and(|t| t > 0) {
        meta.insert("timestamp".into(), json!(now_ms()));
    }
    if !meta.get("version").and_then(Value::as_u64).is_some_and(|v| v > 0) {
        meta.insert("version".into(), json!(1));
    }
    if meta.get("pageId").and_then(Value::as_str).is_none() {
        meta.insert("pageId".into(), json!(page_id));
    }
    meta.insert("hash".into(), json!(hash));
    Some(record)
}

/// Recover the storage-envelope version from a full key's `_v{n}` suffix.
fn envelope_version_of(key: &str) -> u32 {
    key.rsplit_once("_v")
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(SNAPSHOT_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_fills_missing_metadata() {
        let record = json!({"value": {"a": 1}});
        let repaired = repair_record(&record, "page-1").unwrap();
        assert!(validate_record(&repaired));
        assert_eq!(repaired["metadata"]["pageId"], json!("page-1"));
    }

    #[test]
    fn repair_refuses_payloadless_records() {
        assert!(repair_record(&json!({"metadata": {}}), "p").is_none());
        assert!(repair_record(&json!("just a string"), "p").is_none());
    }

    #[test]
    fn envelope_version_parses_from_key_suffix() {
        assert_eq!(envelope_version_of("loomsnap_cell_p_k_v3"), 3);
        assert_eq!(envelope_version_of("no-suffix"), SNAPSHOT_VERSION);
    }
}
