//! End-to-end grid flow: fan out, run, lock, rename, rebuild, re-run —
//! all over one in-memory store, the way a page session would.

use async_trait::async_trait;
use loom_grid::{
    build_units, DataSet, Executor, PipelineThread, Runner, StageConfig, StageKind, StageList,
    VariableRow,
};
use loom_llm::{GenerationOutcome, GenerationRequest};
use loom_snapshot::{CellLocks, CellRef, ThreadLocks};
use loom_store::{DynKv, MemKv};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct EchoExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, request: &GenerationRequest) -> GenerationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        GenerationOutcome {
            success: true,
            text: Some(format!("{}: {}", request.model, request.prompt)),
            duration_ms: 1,
            ..GenerationOutcome::default()
        }
    }
}

fn stages() -> (StageList, StageList, StageList, StageList) {
    let mut models = StageList::new(
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
    models.add(PipelineThread::new(
        "B",
        StageConfig::Model {
            model: "claude-sonnet-4-5".into(),
            temperature: None,
            max_tokens: None,
        },
    ));
    let schemas = StageList::new(
        StageKind::Schema,
        PipelineThread::new("plain", StageConfig::Schema { schema: None }),
    );
    let systems = StageList::new(
        StageKind::System,
        PipelineThread::new(
            "guide",
            StageConfig::System {
                template: "You write travel notes.".into(),
            },
        ),
    );
    let prompts = StageList::new(
        StageKind::Prompt,
        PipelineThread::new(
            "1",
            StageConfig::Prompt {
                template: "Describe ${city} in ${tone} tone".into(),
            },
        ),
    );
    (models, schemas, systems, prompts)
}

fn rows() -> Vec<VariableRow> {
    let pairs = [("Lisbon", "dry"), ("Oslo", "warm")];
    pairs
        .iter()
        .enumerate()
        .map(|(position, (city, tone))| {
            let values: BTreeMap<String, String> = [
                ("city".to_string(), city.to_string()),
                ("tone".to_string(), tone.to_string()),
            ]
            .into();
            VariableRow::new(position, values)
        })
        .collect()
}

#[tokio::test]
async fn full_session_round_trip() {
    let kv: DynKv = Arc::new(MemKv::new());
    let thread_locks = ThreadLocks::new(kv.clone(), "page-1");
    let cell_locks = CellLocks::new(kv.clone(), "page-1");
    let executor = Arc::new(EchoExecutor::default());
    let runner = Runner::new(executor.clone(), cell_locks.clone());

    let (mut models, schemas, systems, prompts) = stages();
    let rows = rows();

    // The data set projection matches both rows exactly.
    let set = DataSet::new(["city".to_string(), "tone".to_string()].into());
    assert_eq!(set.rows(&rows).len(), 2);

    let mut outcome = build_units(
        &[],
        &models,
        &schemas,
        &systems,
        &prompts,
        Some(&thread_locks),
    )
    .unwrap();
    assert_eq!(outcome.units.len(), 2);

    let report = runner.run(&mut outcome.units, &rows[0]).await.unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(
        outcome.units[0].result.as_ref().unwrap().text.as_deref(),
        Some("gpt-4o: Describe Lisbon in dry tone")
    );

    // Freeze the first cell, then re-run the same row: only the other
    // unit hits the executor again.
    let frozen = outcome.units[0].result.clone().unwrap();
    cell_locks
        .lock(
            &Runner::cell_key(&rows[0], &outcome.units[0]),
            &CellRef {
                row_id: rows[0].id.clone(),
                column_id: outcome.units[0].storage_key.clone(),
                execution_id: outcome.units[0].id.clone(),
            },
            serde_json::to_value(&frozen).unwrap(),
        )
        .unwrap();

    let before = executor.calls.load(Ordering::SeqCst);
    let report = runner.run(&mut outcome.units, &rows[0]).await.unwrap();
    assert_eq!(report.skipped_locked, 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), before + 1);

    // Lock model A's config, edit it live, and rebuild: the unit still
    // carries the locked model because the snapshot is authoritative.
    let thread_a = models.threads()[0].clone();
    thread_a.lock(&thread_locks).unwrap();
    let id_a = thread_a.id.clone();
    let mut edited = thread_a;
    edited.config = StageConfig::Model {
        model: "gpt-5".into(),
        temperature: None,
        max_tokens: None,
    };
    models.remove(&id_a).unwrap();
    models.add(edited);
    let rebuilt = build_units(
        &outcome.units,
        &models,
        &schemas,
        &systems,
        &prompts,
        Some(&thread_locks),
    )
    .unwrap();
    let unit_a = rebuilt
        .units
        .iter()
        .find(|u| u.name.starts_with("A×"))
        .expect("unit for model A");
    assert_eq!(unit_a.inputs.model, "gpt-4o");
    // Same composite key, so the previous result carried forward.
    assert!(unit_a.result.is_some());
    assert!(rebuilt.orphaned.is_empty());

    // Renaming the model thread changes the composite key: the old
    // result is orphaned and the cell lock no longer matches anything.
    let mut renamed_models = models.clone();
    let id = renamed_models
        .threads()
        .iter()
        .find(|t| t.name == "A")
        .unwrap()
        .id
        .clone();
    renamed_models.rename(&id, "A2").unwrap();
    let rebuilt = build_units(
        &rebuilt.units,
        &renamed_models,
        &schemas,
        &systems,
        &prompts,
        Some(&thread_locks),
    )
    .unwrap();
    assert_eq!(rebuilt.orphaned.len(), 1);
    assert!(rebuilt.orphaned[0].starts_with("A|#|"));
    let unit_a2 = rebuilt
        .units
        .iter()
        .find(|u| u.name.starts_with("A2×"))
        .expect("renamed unit");
    assert!(unit_a2.result.is_none());
}
