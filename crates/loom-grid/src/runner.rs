//! Batched execution of the grid's units against one variable row.
//! Locked cells short-circuit to their persisted snapshot, template gaps
//! fail before dispatch, and provider failures stay confined to their
//! own cell.

use crate::{
    GridResult,
    fanout::{ExecutionUnit, STORAGE_SEPARATOR},
    rows::VariableRow,
};
use async_trait::async_trait;
use futures::future::join_all;
use loom_llm::{Client, GenerationOutcome, GenerationRequest, Usage};
use loom_snapshot::{CellLocks, Entry};
use std::sync::Arc;
use tracing::{debug, warn};

/// The dispatch seam. Production uses [`loom_llm::Client`]; tests swap in
/// a mock without touching the run loop.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: &GenerationRequest) -> GenerationOutcome;
}

#[async_trait]
impl Executor for Client {
    async fn execute(&self, request: &GenerationRequest) -> GenerationOutcome {
        self.dispatch(request).await
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RunnerConfig {
    /// Units dispatched concurrently per batch. The next batch starts
    /// only after the whole previous batch settled.
    pub batch_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { batch_size: 3 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    pub failed: usize,
    /// Units served from their cell lock instead of the provider.
    pub skipped_locked: usize,
    pub usage: Usage,
}

pub struct Runner {
    executor: Arc<dyn Executor>,
    cell_locks: CellLocks,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(executor: Arc<dyn Executor>, cell_locks: CellLocks) -> Self {
        Self::with_config(executor, cell_locks, RunnerConfig::default())
    }

    pub fn with_config(
        executor: Arc<dyn Executor>,
        cell_locks: CellLocks,
        config: RunnerConfig,
    ) -> Self {
        Self {
            executor,
            cell_locks,
            config: RunnerConfig {
                batch_size: config.batch_size.max(1),
            },
        }
    }

    /// The composite key a (row, unit) cell locks under. Stable across
    /// rebuilds as long as the row and the contributing thread names are.
    pub fn cell_key(row: &VariableRow, unit: &ExecutionUnit) -> String {
        format!("{}{}{}", row.id, STORAGE_SEPARATOR, unit.storage_key)
    }

    /// Run every unit against one row. Results land on the units
    /// themselves; the report summarizes what happened.
    pub async fn run(
        &self,
        units: &mut [ExecutionUnit],
        row: &VariableRow,
    ) -> GridResult<RunReport> {
        let data = row.as_value();
        let mut report = RunReport::default();
        let mut pending: Vec<(usize, GenerationRequest)> = Vec::new();

        for (index, unit) in units.iter_mut().enumerate() {
            let key = Self::cell_key(row, unit);
            if let Entry::Present(snapshot) = self.cell_locks.entry(&key)? {
                debug!(key, "cell is locked, serving the persisted result");
                unit.result = Some(outcome_from_snapshot(snapshot.result));
                report.skipped_locked += 1;
                continue;
            }

            let (request, unresolved) = unit.build_request(&data);
            if !unresolved.is_empty() {
                warn!(unit = %unit.name, ?unresolved, "unresolved placeholders, unit not dispatched");
                unit.result = Some(GenerationOutcome::failure(
                    format!("unresolved placeholders: {}", unresolved.join(", ")),
                    0,
                ));
                report.failed += 1;
                continue;
            }
            pending.push((index, request));
        }

        for batch in pending.chunks(self.config.batch_size) {
            for (index, _) in batch {
                units[*index].is_running = true;
            }
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|(_, request)| self.executor.execute(request)),
            )
            .await;
            for ((index, _), outcome) in batch.iter().zip(outcomes) {
                if outcome.success {
                    report.completed += 1;
                } else {
                    report.failed += 1;
                }
                if let Some(usage) = outcome.usage {
                    report.usage = report.usage + usage;
                }
                let unit = &mut units[*index];
                unit.result = Some(outcome);
                unit.is_running = false;
            }
        }
        Ok(report)
    }
}

/// A locked cell's persisted result, restored to an outcome. Snapshots
/// written by this crate round-trip exactly; anything else is surfaced
/// as a successful object result rather than dropped.
fn outcome_from_snapshot(result: serde_json::Value) -> GenerationOutcome {
    match serde_json::from_value::<GenerationOutcome>(result.clone()) {
        Ok(outcome) => outcome,
        Err(_) => GenerationOutcome {
            success: true,
            object: Some(result),
            ..GenerationOutcome::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::build_units;
    use crate::thread::{PipelineThread, StageConfig, StageKind, StageList};
    use loom_snapshot::CellRef;
    use loom_store::MemKv;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MockExecutor {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn execute(&self, request: &GenerationRequest) -> GenerationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if request.prompt.contains("boom") {
                GenerationOutcome::failure("boom", 1)
            } else {
                GenerationOutcome {
                    success: true,
                    text: Some(format!("echo: {}", request.prompt)),
                    usage: Some(Usage::new(2, 3)),
                    duration_ms: 1,
                    ..GenerationOutcome::default()
                }
            }
        }
    }

    fn prompt_stage(templates: &[&str]) -> StageList {
        let mut stage = StageList::new(
            StageKind::Prompt,
            PipelineThread::new(
                "p0",
                StageConfig::Prompt {
                    template: templates[0].into(),
                },
            ),
        );
        for (i, template) in templates.iter().enumerate().skip(1) {
            stage.add(PipelineThread::new(
                format!("p{i}"),
                StageConfig::Prompt {
                    template: (*template).into(),
                },
            ));
        }
        stage
    }

    fn units_for(templates: &[&str]) -> Vec<ExecutionUnit> {
        let models = StageList::new(
            StageKind::Model,
            PipelineThread::new(
                "A",
                StageConfig::Model {
                    model: "gpt-4o".into(),
                    temperature: None,
                    max_tokens: None,
                },
            ),
        );
        let schemas = StageList::new(
            StageKind::Schema,
            PipelineThread::new("plain", StageConfig::Schema { schema: None }),
        );
        let systems = StageList::new(
            StageKind::System,
            PipelineThread::new("sys", StageConfig::System { template: "".into() }),
        );
        build_units(&[], &models, &schemas, &systems, &prompt_stage(templates), None)
            .unwrap()
            .units
    }

    fn row(pairs: &[(&str, &str)]) -> VariableRow {
        VariableRow::new(
            0,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn runner(executor: Arc<MockExecutor>, batch_size: usize) -> Runner {
        Runner::with_config(
            executor,
            CellLocks::new(Arc::new(MemKv::new()), "page-1"),
            RunnerConfig { batch_size },
        )
    }

    #[tokio::test]
    async fn failures_stay_confined_to_their_own_cell() {
        let executor = Arc::new(MockExecutor::default());
        let runner = runner(executor.clone(), 3);
        let mut units = units_for(&["Describe ${city}", "boom ${city}"]);

        let report = runner.run(&mut units, &row(&[("city", "Lisbon")])).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.usage.total_tokens, 5);

        let ok = units[0].result.as_ref().unwrap();
        assert_eq!(ok.text.as_deref(), Some("echo: Describe Lisbon"));
        let bad = units[1].result.as_ref().unwrap();
        assert!(!bad.success);
        assert_eq!(bad.error.as_deref(), Some("boom"));
        assert!(units.iter().all(|u| !u.is_running));
    }

    #[tokio::test]
    async fn locked_cells_are_served_from_the_snapshot() {
        let executor = Arc::new(MockExecutor::default());
        let cell_locks = CellLocks::new(Arc::new(MemKv::new()), "page-1");
        let runner = Runner::new(executor.clone(), cell_locks.clone());
        let mut units = units_for(&["Describe ${city}", "Summarize ${city}"]);
        let data_row = row(&[("city", "Lisbon")]);

        let frozen = GenerationOutcome {
            success: true,
            text: Some("frozen".into()),
            duration_ms: 7,
            ..GenerationOutcome::default()
        };
        cell_locks
            .lock(
                &Runner::cell_key(&data_row, &units[0]),
                &CellRef {
                    row_id: data_row.id.clone(),
                    column_id: units[0].storage_key.clone(),
                    execution_id: units[0].id.clone(),
                },
                serde_json::to_value(&frozen).unwrap(),
            )
            .unwrap();

        let report = runner.run(&mut units, &data_row).await.unwrap();
        assert_eq!(report.skipped_locked, 1);
        assert_eq!(report.completed, 1);
        // The locked unit never reached the executor.
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            units[0].result.as_ref().unwrap().text.as_deref(),
            Some("frozen")
        );
    }

    #[tokio::test]
    async fn unresolved_placeholders_fail_without_dispatch() {
        let executor = Arc::new(MockExecutor::default());
        let runner = runner(executor.clone(), 3);
        let mut units = units_for(&["Describe ${city}"]);

        let report = runner.run(&mut units, &row(&[("town", "Oslo")])).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        let result = units[0].result.as_ref().unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("city"));
    }

    #[tokio::test]
    async fn batches_cap_concurrent_dispatch() {
        let executor = Arc::new(MockExecutor::default());
        let runner = runner(executor.clone(), 2);
        let mut units = units_for(&[
            "a ${city}",
            "b ${city}",
            "c ${city}",
            "d ${city}",
            "e ${city}",
        ]);

        let report = runner.run(&mut units, &row(&[("city", "Lima")])).await.unwrap();
        assert_eq!(report.completed, 5);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 5);
        assert!(executor.max_in_flight.load(Ordering::SeqCst) <= 2);
    }
}
