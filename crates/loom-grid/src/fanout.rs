use crate::{
    GridResult,
    template::render_template,
    thread::{StageConfig, StageList},
};
use loom_llm::{GenerationOutcome, GenerationRequest};
use loom_snapshot::ThreadLocks;
use loom_store::mint_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Separator for the human-facing composite name.
pub const DISPLAY_SEPARATOR: &str = "×";
/// Separator for the storage composite key. Must never change: cell-lock
/// lookups depend on rebuilt units producing identical keys.
pub const STORAGE_SEPARATOR: &str = "|#|";

/// One stage thread's contribution to a unit's identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagePick {
    pub thread_id: String,
    pub name: String,
}

/// The request ingredients resolved from the four stage configs at build
/// time. Refreshed on every rebuild even when the unit itself is carried
/// forward.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitInputs {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    pub system_template: String,
    pub prompt_template: String,
}

/// A derived execution unit: one cell column of the grid. Never created
/// directly by a user; identity is the composite of its stage thread
/// names, so results survive rebuilds exactly when those names do.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUnit {
    pub id: String,
    pub name: String,
    pub storage_key: String,
    pub model: StagePick,
    pub schema: StagePick,
    pub system: StagePick,
    pub prompt: StagePick,
    pub inputs: UnitInputs,
    pub visible: bool,
    pub is_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationOutcome>,
}

impl ExecutionUnit {
    /// Render the unit's templates against one row of data and assemble
    /// the generation request. Unresolved placeholders are returned for
    /// the caller to decide on.
    pub fn build_request(&self, row_data: &Value) -> (GenerationRequest, Vec<String>) {
        let system = render_template(&self.inputs.system_template, row_data);
        let prompt = render_template(&self.inputs.prompt_template, row_data);
        let mut unresolved = system.unresolved;
        unresolved.extend(prompt.unresolved);
        let request = GenerationRequest {
            model: self.inputs.model.clone(),
            system: if system.rendered.is_empty() {
                None
            } else {
                Some(system.rendered)
            },
            prompt: prompt.rendered,
            schema: self.inputs.schema.clone(),
            temperature: self.inputs.temperature,
            max_tokens: self.inputs.max_tokens,
            ..GenerationRequest::default()
        };
        (request, unresolved)
    }
}

/// The result of a full cross-product rebuild.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RebuildOutcome {
    pub units: Vec<ExecutionUnit>,
    /// Storage keys of previous units that held a result or were running
    /// and have no counterpart in the new set. Their results are gone;
    /// any cell lock under the key is now orphaned. Surfaced so callers
    /// can warn, typically after a thread rename.
    pub orphaned: Vec<String>,
}

/// Recompute the full cross product of visible threads and reconcile it
/// against the previous unit list. The output replaces the old list
/// wholesale; carry-forward of `id`, `is_running` and `result` happens
/// only on an exact composite-key match.
pub fn build_units(
    previous: &[ExecutionUnit],
    models: &StageList,
    schemas: &StageList,
    systems: &StageList,
    prompts: &StageList,
    locks: Option<&ThreadLocks>,
) -> GridResult<RebuildOutcome> {
    let by_key: HashMap<&str, &ExecutionUnit> = previous
        .iter()
        .map(|unit| (unit.storage_key.as_str(), unit))
        .collect();

    let mut units = Vec::new();
    for model in models.visible() {
        for schema in schemas.visible() {
            for system in systems.visible() {
                for prompt in prompts.visible() {
                    let picks = [model, schema, system, prompt];
                    let name = picks
                        .map(|t| t.name.as_str())
                        .join(DISPLAY_SEPARATOR);
                    let storage_key = picks
                        .map(|t| t.name.as_str())
                        .join(STORAGE_SEPARATOR);

                    let mut inputs = UnitInputs::default();
                    for thread in picks {
                        let config = match locks {
                            Some(locks) => thread.effective_config(locks)?,
                            None => thread.config.clone(),
                        };
                        apply_config(&mut inputs, config);
                    }

                    let (id, is_running, result) = match by_key.get(storage_key.as_str()) {
                        Some(prev) => (prev.id.clone(), prev.is_running, prev.result.clone()),
                        None => (mint_id("exec"), false, None),
                    };
                    units.push(ExecutionUnit {
                        id,
                        name,
                        storage_key,
                        model: pick_of(model),
                        schema: pick_of(schema),
                        system: pick_of(system),
                        prompt: pick_of(prompt),
                        inputs,
                        visible: true,
                        is_running,
                        result,
                    });
                }
            }
        }
    }

    let orphaned: Vec<String> = previous
        .iter()
        .filter(|prev| prev.result.is_some() || prev.is_running)
        .filter(|prev| !units.iter().any(|u| u.storage_key == prev.storage_key))
        .map(|prev| prev.storage_key.clone())
        .collect();
    if !orphaned.is_empty() {
        debug!(count = orphaned.len(), "rebuild orphaned units with results");
    }
    Ok(RebuildOutcome { units, orphaned })
}

fn pick_of(thread: &crate::thread::PipelineThread) -> StagePick {
    StagePick {
        thread_id: thread.id.clone(),
        name: thread.name.clone(),
    }
}

fn apply_config(inputs: &mut UnitInputs, config: StageConfig) {
    match config {
        StageConfig::Model {
            model,
            temperature,
            max_tokens,
        } => {
            inputs.model = model;
            inputs.temperature = temperature;
            inputs.max_tokens = max_tokens;
        }
        StageConfig::Schema { schema } => inputs.schema = schema,
        StageConfig::System { template } => inputs.system_template = template,
        StageConfig::Prompt { template } => inputs.prompt_template = template,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{PipelineThread, StageKind};
    use serde_json::json;

    fn stages() -> (StageList, StageList, StageList, StageList) {
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
            PipelineThread::new(
                "terse",
                StageConfig::System {
                    template: "Be terse.".into(),
                },
            ),
        );
        let mut prompts = StageList::new(
            StageKind::Prompt,
            PipelineThread::new(
                "1",
                StageConfig::Prompt {
                    template: "Describe ${city}".into(),
                },
            ),
        );
        prompts.add(PipelineThread::new(
            "2",
            StageConfig::Prompt {
                template: "Summarize ${city}".into(),
            },
        ));
        (models, schemas, systems, prompts)
    }

    #[test]
    fn cross_product_covers_all_visible_combinations() {
        let (models, schemas, systems, prompts) = stages();
        let outcome = build_units(&[], &models, &schemas, &systems, &prompts, None).unwrap();
        assert_eq!(outcome.units.len(), 2);
        assert_eq!(outcome.units[0].name, "A×plain×terse×1");
        assert_eq!(outcome.units[0].storage_key, "A|#|plain|#|terse|#|1");
        assert!(outcome.orphaned.is_empty());
    }

    #[test]
    fn rename_orphans_only_the_renamed_key() {
        let (models, schemas, systems, mut prompts) = stages();
        let mut outcome = build_units(&[], &models, &schemas, &systems, &prompts, None).unwrap();

        // Give both units results.
        for unit in &mut outcome.units {
            unit.result = Some(GenerationOutcome {
                success: true,
                text: Some(format!("result for {}", unit.name)),
                ..GenerationOutcome::default()
            });
        }
        let kept_id = outcome.units[1].id.clone();

        let renamed_id = prompts.threads()[0].id.clone();
        prompts.rename(&renamed_id, "1'").unwrap();
        let rebuilt =
            build_units(&outcome.units, &models, &schemas, &systems, &prompts, None).unwrap();

        // The unit whose key changed starts over; the other carries its
        // id and result forward.
        let fresh = &rebuilt.units[0];
        assert_eq!(fresh.name, "A×plain×terse×1'");
        assert!(fresh.result.is_none());

        let kept = &rebuilt.units[1];
        assert_eq!(kept.id, kept_id);
        assert_eq!(
            kept.result.as_ref().unwrap().text.as_deref(),
            Some("result for A×plain×terse×2")
        );

        assert_eq!(rebuilt.orphaned, vec!["A|#|plain|#|terse|#|1".to_string()]);
    }

    #[test]
    fn hiding_a_thread_shrinks_the_product() {
        let (models, schemas, systems, mut prompts) = stages();
        let hidden = prompts.threads()[1].id.clone();
        prompts.set_visible(&hidden, false).unwrap();
        let outcome = build_units(&[], &models, &schemas, &systems, &prompts, None).unwrap();
        assert_eq!(outcome.units.len(), 1);
    }

    #[test]
    fn build_request_substitutes_row_data() {
        let (models, schemas, systems, prompts) = stages();
        let outcome = build_units(&[], &models, &schemas, &systems, &prompts, None).unwrap();
        let (request, unresolved) =
            outcome.units[0].build_request(&json!({"city": "Lisbon"}));
        assert!(unresolved.is_empty());
        assert_eq!(request.prompt, "Describe Lisbon");
        assert_eq!(request.system.as_deref(), Some("Be terse."));
        assert_eq!(request.model, "gpt-4o");

        let (_, unresolved) = outcome.units[0].build_request(&json!({}));
        assert_eq!(unresolved, vec!["city"]);
    }
}
