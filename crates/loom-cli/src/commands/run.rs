//! `loom run`: fan out a grid config and execute it row by row.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use loom_grid::{Runner, RunnerConfig, StageList, VariableRow, build_units};
use loom_llm::Client;
use serde::Deserialize;
use serde_json::json;

use crate::opts::PageOpts;

/// A full grid description: the four stage lists plus the variable rows.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridConfig {
    models: StageList,
    schemas: StageList,
    systems: StageList,
    prompts: StageList,
    #[serde(default)]
    rows: Vec<VariableRow>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Grid config JSON file
    pub config: PathBuf,

    /// Run only the row at this position
    #[arg(long)]
    pub row: Option<usize>,

    /// Units dispatched concurrently per batch
    #[arg(long, default_value_t = 3)]
    pub batch_size: usize,
}

pub async fn cmd_run(opts: &PageOpts, args: &RunArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("read grid config {}", args.config.display()))?;
    let config: GridConfig = serde_json::from_str(&text).context("parse grid config")?;

    let thread_locks = opts.thread_locks()?;
    let cell_locks = opts.cell_locks()?;
    let client = Client::from_env().context("configure providers from environment")?;
    let runner = Runner::with_config(
        Arc::new(client),
        cell_locks,
        RunnerConfig {
            batch_size: args.batch_size,
        },
    );

    let mut outcome = build_units(
        &[],
        &config.models,
        &config.schemas,
        &config.systems,
        &config.prompts,
        Some(&thread_locks),
    )?;

    let rows: Vec<&VariableRow> = match args.row {
        Some(position) => {
            let row = config
                .rows
                .iter()
                .find(|r| r.position == position)
                .with_context(|| format!("no row at position {position}"))?;
            vec![row]
        }
        None => config.rows.iter().filter(|r| r.visible).collect(),
    };

    let mut output = Vec::new();
    for row in rows {
        let report = runner.run(&mut outcome.units, row).await?;
        output.push(json!({
            "row": row.position,
            "completed": report.completed,
            "failed": report.failed,
            "skippedLocked": report.skipped_locked,
            "totalTokens": report.usage.total_tokens,
            "results": outcome
                .units
                .iter()
                .map(|u| json!({ "unit": u.name, "result": u.result }))
                .collect::<Vec<_>>(),
        }));
    }
    opts.print(&output)
}
