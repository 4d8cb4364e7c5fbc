//! `loom lock` / `loom unlock`: freeze and release persisted values.

use anyhow::Result;
use clap::{Args, Subcommand};
use loom_snapshot::CellRef;

use crate::input::parse_json_value;
use crate::opts::PageOpts;

#[derive(Subcommand, Debug)]
pub enum LockCommand {
    /// Freeze a pipeline thread's config
    Thread(ThreadLockArgs),

    /// Freeze one cell's result under its composite key
    Cell(CellLockArgs),

    /// Freeze a page-level module value
    Module(ModuleLockArgs),
}

#[derive(Subcommand, Debug)]
pub enum UnlockCommand {
    /// Release a thread lock
    Thread { id: String },

    /// Release a cell lock
    Cell { key: String },

    /// Release a module lock
    Module { id: String },
}

#[derive(Args, Debug)]
pub struct ThreadLockArgs {
    pub id: String,

    /// Stage the thread belongs to (model, schema, system, prompt)
    #[arg(long)]
    pub stage: String,

    /// Config to freeze: JSON literal, @file, or @- for stdin
    #[arg(long)]
    pub value: String,
}

#[derive(Args, Debug)]
pub struct CellLockArgs {
    pub key: String,

    #[arg(long)]
    pub row_id: String,

    #[arg(long)]
    pub column_id: String,

    #[arg(long)]
    pub execution_id: String,

    /// Result to freeze: JSON literal, @file, or @- for stdin
    #[arg(long)]
    pub result: String,
}

#[derive(Args, Debug)]
pub struct ModuleLockArgs {
    pub id: String,

    /// Value to freeze: JSON literal, @file, or @- for stdin
    #[arg(long)]
    pub value: String,
}

pub fn cmd_lock(opts: &PageOpts, cmd: &LockCommand) -> Result<()> {
    match cmd {
        LockCommand::Thread(args) => {
            let value = parse_json_value(&args.value)?;
            let snapshot = opts.thread_locks()?.lock(&args.id, &args.stage, value)?;
            opts.print(&snapshot)
        }
        LockCommand::Cell(args) => {
            let result = parse_json_value(&args.result)?;
            let cell = CellRef {
                row_id: args.row_id.clone(),
                column_id: args.column_id.clone(),
                execution_id: args.execution_id.clone(),
            };
            let snapshot = opts.cell_locks()?.lock(&args.key, &cell, result)?;
            opts.print(&snapshot)
        }
        LockCommand::Module(args) => {
            let value = parse_json_value(&args.value)?;
            let snapshot = opts.module_locks()?.lock(&args.id, value)?;
            opts.print(&snapshot)
        }
    }
}

pub fn cmd_unlock(opts: &PageOpts, cmd: &UnlockCommand) -> Result<()> {
    match cmd {
        UnlockCommand::Thread { id } => opts.thread_locks()?.unlock(id)?,
        UnlockCommand::Cell { key } => opts.cell_locks()?.unlock(key)?,
        UnlockCommand::Module { id } => opts.module_locks()?.unlock(id)?,
    }
    println!("Unlocked");
    Ok(())
}
