//! `loom backup` / `loom restore`: page-namespace export and import.

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Args;

use crate::input::parse_input_value;
use crate::opts::PageOpts;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// Output file (stdout when omitted)
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup envelope: JSON literal, @file, or @- for stdin
    pub input: String,
}

pub fn cmd_backup(opts: &PageOpts, args: &BackupArgs) -> Result<()> {
    let backup = opts.recovery()?.backup()?;
    match &args.out {
        Some(path) => std::fs::write(path, &backup)
            .with_context(|| format!("write backup to {}", path.display()))?,
        None => println!("{backup}"),
    }
    Ok(())
}

pub fn cmd_restore(opts: &PageOpts, args: &RestoreArgs) -> Result<()> {
    let backup = parse_input_value(&args.input)?;
    let report = opts.recovery()?.restore(&backup)?;
    opts.print(&report)?;
    ensure!(
        report.success,
        "restore completed with {} failures",
        report.failed.max(report.errors.len())
    );
    Ok(())
}
