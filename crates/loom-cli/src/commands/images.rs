//! `loom images`: blob-store maintenance.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use loom_store::{FsBlobStore, ImageStore};
use serde_json::json;

use crate::opts::PageOpts;

#[derive(Subcommand, Debug)]
pub enum ImagesCommand {
    /// Delete stored images older than the cutoff
    Sweep(SweepArgs),

    /// List stored image ids
    List,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Age cutoff in milliseconds
    #[arg(long, default_value_t = 86_400_000)]
    pub max_age_ms: u64,
}

pub async fn cmd_images(opts: &PageOpts, cmd: &ImagesCommand) -> Result<()> {
    let blobs = FsBlobStore::open(&opts.store_dir)?;
    let store = ImageStore::new(Arc::new(blobs));
    match cmd {
        ImagesCommand::Sweep(args) => {
            let removed = store.clear_old_images(args.max_age_ms).await?;
            opts.print(&json!({ "removed": removed }))
        }
        ImagesCommand::List => {
            let mut ids = store.all_image_ids().await?;
            ids.sort();
            opts.print(&ids)
        }
    }
}
