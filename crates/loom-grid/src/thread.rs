use crate::{GridError, GridResult};
use loom_snapshot::{Entry, ThreadLocks};
use loom_store::mint_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The four independent pipeline stages whose cross product forms the
/// grid's execution units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageKind {
    Model,
    Schema,
    System,
    Prompt,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageKind::Model => "model",
            StageKind::Schema => "schema",
            StageKind::System => "system",
            StageKind::Prompt => "prompt",
        };
        f.write_str(label)
    }
}

/// Stage-specific editable fields of a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "camelCase")]
pub enum StageConfig {
    #[serde(rename_all = "camelCase")]
    Model {
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Schema {
        /// `None` keeps the call in plain-text mode.
        #[serde(skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    System { template: String },
    #[serde(rename_all = "camelCase")]
    Prompt { template: String },
}

impl StageConfig {
    pub fn kind(&self) -> StageKind {
        match self {
            StageConfig::Model { .. } => StageKind::Model,
            StageConfig::Schema { .. } => StageKind::Schema,
            StageConfig::System { .. } => StageKind::System,
            StageConfig::Prompt { .. } => StageKind::Prompt,
        }
    }
}

/// One thread within a pipeline stage. `id` is the generated identity;
/// `name` is the user-facing identity that snapshots cross-reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineThread {
    pub id: String,
    pub name: String,
    pub visible: bool,
    #[serde(flatten)]
    pub config: StageConfig,
}

impl PipelineThread {
    pub fn new(name: impl Into<String>, config: StageConfig) -> Self {
        Self {
            id: mint_id("thread"),
            name: name.into(),
            visible: true,
            config,
        }
    }

    /// The thread's authoritative config: the persisted snapshot when a
    /// lock exists, the live config otherwise. A locked snapshot whose
    /// value no longer parses as a stage config falls back to live.
    pub fn effective_config(&self, locks: &ThreadLocks) -> GridResult<StageConfig> {
        match locks.entry(&self.id)? {
            Entry::Present(snapshot) => {
                match serde_json::from_value::<StageConfig>(snapshot.value.clone()) {
                    Ok(config) => Ok(config),
                    Err(_) => Ok(self.config.clone()),
                }
            }
            Entry::Absent => Ok(self.config.clone()),
        }
    }

    /// Freeze the current live config into a lock.
    pub fn lock(&self, locks: &ThreadLocks) -> GridResult<()> {
        let value = serde_json::to_value(&self.config)?;
        locks.lock(&self.id, &self.config.kind().to_string(), value)?;
        Ok(())
    }

    pub fn unlock(&self, locks: &ThreadLocks) -> GridResult<()> {
        Ok(locks.unlock(&self.id)?)
    }
}

/// The ordered thread list of one stage. Never empty: the last thread of
/// a stage cannot be removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageList {
    pub kind: StageKind,
    threads: Vec<PipelineThread>,
}

impl StageList {
    pub fn new(kind: StageKind, first: PipelineThread) -> Self {
        Self {
            kind,
            threads: vec![first],
        }
    }

    pub fn threads(&self) -> &[PipelineThread] {
        &self.threads
    }

    pub fn visible(&self) -> impl Iterator<Item = &PipelineThread> {
        self.threads.iter().filter(|t| t.visible)
    }

    pub fn add(&mut self, thread: PipelineThread) {
        self.threads.push(thread);
    }

    pub fn remove(&mut self, thread_id: &str) -> GridResult<PipelineThread> {
        if self.threads.len() <= 1 {
            return Err(GridError::LastThread(self.kind));
        }
        let index = self
            .threads
            .iter()
            .position(|t| t.id == thread_id)
            .ok_or_else(|| GridError::UnknownThread {
                stage: self.kind,
                name: thread_id.to_string(),
            })?;
        Ok(self.threads.remove(index))
    }

    pub fn rename(&mut self, thread_id: &str, name: impl Into<String>) -> GridResult<()> {
        let thread = self.get_mut(thread_id)?;
        thread.name = name.into();
        Ok(())
    }

    pub fn set_visible(&mut self, thread_id: &str, visible: bool) -> GridResult<()> {
        let thread = self.get_mut(thread_id)?;
        thread.visible = visible;
        Ok(())
    }

    fn get_mut(&mut self, thread_id: &str) -> GridResult<&mut PipelineThread> {
        let kind = self.kind;
        self.threads
            .iter_mut()
            .find(|t| t.id == thread_id)
            .ok_or_else(|| GridError::UnknownThread {
                stage: kind,
                name: thread_id.to_string(),
            })
    }
}
