//! `loom recover` / `loom migrate`: snapshot-namespace maintenance.

use anyhow::{Result, ensure};
use clap::Args;

use crate::opts::PageOpts;

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Only records at this metadata version are rewritten
    #[arg(long)]
    pub from: u32,

    #[arg(long)]
    pub to: u32,
}

pub fn cmd_recover(opts: &PageOpts) -> Result<()> {
    let report = opts.recovery()?.recover()?;
    opts.print(&report)?;
    ensure!(
        report.success,
        "recover deleted {} unrecoverable records",
        report.failed
    );
    Ok(())
}

pub fn cmd_migrate(opts: &PageOpts, args: &MigrateArgs) -> Result<()> {
    let report = opts.recovery()?.migrate(args.from, args.to)?;
    opts.print(&report)?;
    ensure!(
        report.failed == 0,
        "migrate failed on {} records",
        report.failed
    );
    Ok(())
}
