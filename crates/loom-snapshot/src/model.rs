use crate::SNAPSHOT_VERSION;
use loom_hash::content_hash;
use loom_store::{mint_id, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata carried by every snapshot. `hash` commits to the payload
/// (`value` or `result`) only, never to the metadata itself, so metadata
/// migrations keep the hash stable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub id: String,
    pub timestamp: u64,
    pub version: u32,
    pub hash: String,
    pub page_id: String,
}

impl SnapshotMeta {
    fn fresh(page_id: &str, hash: String) -> Self {
        Self {
            id: mint_id("snap"),
            timestamp: now_ms(),
            version: SNAPSHOT_VERSION,
            hash,
            page_id: page_id.to_string(),
        }
    }
}

/// A locked pipeline-stage thread: the thread's editable fields frozen at
/// lock time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot {
    pub metadata: SnapshotMeta,
    #[serde(rename = "type")]
    pub stage: String,
    pub thread_id: String,
    pub value: Value,
    pub is_locked: bool,
}

/// A locked result cell: one execution unit's result frozen so re-running
/// the grid does not overwrite it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSnapshot {
    pub metadata: SnapshotMeta,
    pub row_id: String,
    pub column_id: String,
    pub execution_id: String,
    pub result: Value,
    pub is_locked: bool,
}

/// A locked named module value (page-level configuration blocks).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSnapshot {
    pub metadata: SnapshotMeta,
    pub module_id: String,
    pub value: Value,
    pub is_locked: bool,
}

/// Any persisted snapshot. Untagged: the three payload shapes carry
/// disjoint required fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Snapshot {
    Cell(CellSnapshot),
    Thread(ThreadSnapshot),
    Module(ModuleSnapshot),
}

impl ThreadSnapshot {
    pub fn capture(
        page_id: &str,
        stage: &str,
        thread_id: &str,
        value: Value,
    ) -> Result<Self, serde_json::Error> {
        let hash = content_hash(&value)?;
        Ok(Self {
            metadata: SnapshotMeta::fresh(page_id, hash),
            stage: stage.to_string(),
            thread_id: thread_id.to_string(),
            value,
            is_locked: true,
        })
    }
}

impl CellSnapshot {
    pub fn capture(
        page_id: &str,
        row_id: &str,
        column_id: &str,
        execution_id: &str,
        result: Value,
    ) -> Result<Self, serde_json::Error> {
        let hash = content_hash(&result)?;
        Ok(Self {
            metadata: SnapshotMeta::fresh(page_id, hash),
            row_id: row_id.to_string(),
            column_id: column_id.to_string(),
            execution_id: execution_id.to_string(),
            result,
            is_locked: true,
        })
    }
}

impl ModuleSnapshot {
    pub fn capture(
        page_id: &str,
        module_id: &str,
        value: Value,
    ) -> Result<Self, serde_json::Error> {
        let hash = content_hash(&value)?;
        Ok(Self {
            metadata: SnapshotMeta::fresh(page_id, hash),
            module_id: module_id.to_string(),
            value,
            is_locked: true,
        })
    }
}

impl Snapshot {
    pub fn metadata(&self) -> &SnapshotMeta {
        match self {
            Snapshot::Cell(s) => &s.metadata,
            Snapshot::Thread(s) => &s.metadata,
            Snapshot::Module(s) => &s.metadata,
        }
    }

    /// The hashed payload: `result` for cells, `value` otherwise.
    pub fn payload(&self) -> &Value {
        match self {
            Snapshot::Cell(s) => &s.result,
            Snapshot::Thread(s) => &s.value,
            Snapshot::Module(s) => &s.value,
        }
    }

    /// Structural integrity check: all metadata fields present and the
    /// recomputed payload hash equal to `metadata.hash`. A failing
    /// snapshot must not be trusted as authoritative.
    pub fn validate(&self) -> bool {
        match serde_json::to_value(self) {
            Ok(record) => validate_record(&record),
            Err(_) => false,
        }
    }
}

/// Extract the hashed payload from a raw persisted record: `value` if
/// present, else `result`.
pub fn payload_of(record: &Value) -> Option<&Value> {
    record.get("value").or_else(|| record.get("result"))
}

/// Schema-unaware validation over a raw persisted record, used by the
/// recovery manager and by typed [`Snapshot::validate`].
pub fn validate_record(record: &Value) -> bool {
    let Some(meta) = record.get("metadata") else {
        return false;
    };
    let id_ok = meta
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    let timestamp_ok = meta
        .get("timestamp")
        .and_then(Value::as_u64)
        .is_some_and(|t| t > 0);
    let version_ok = meta
        .get("version")
        .and_then(Value::as_u64)
        .is_some_and(|v| v > 0);
    let Some(stored_hash) = meta.get("hash").and_then(Value::as_str) else {
        return false;
    };
    if !(id_ok && timestamp_ok && version_ok) || stored_hash.is_empty() {
        return false;
    }
    let Some(payload) = payload_of(record) else {
        return false;
    };
    match content_hash(payload) {
        Ok(actual) => actual == stored_hash,
        Err(_) => false,
    }
}
