//! Global CLI options and store resolution.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use loom_snapshot::{CellLocks, ModuleLocks, RecoveryManager, ThreadLocks};
use loom_store::{DynKv, FsKv};
use serde::Serialize;

/// Global options for CLI commands.
///
/// These options apply to all commands and can be set via env vars.
#[derive(Args, Debug, Clone)]
pub struct PageOpts {
    /// Store directory (env: LOOM_STORE)
    #[arg(short = 's', long = "store-dir", global = true, env = "LOOM_STORE", default_value = "loom-data")]
    pub store_dir: PathBuf,

    /// Page namespace (env: LOOM_PAGE)
    #[arg(short = 'p', long, global = true, env = "LOOM_PAGE", default_value = "default")]
    pub page: String,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,
}

impl PageOpts {
    pub fn kv(&self) -> Result<DynKv> {
        let kv = FsKv::open(&self.store_dir)
            .with_context(|| format!("open store at {}", self.store_dir.display()))?;
        Ok(Arc::new(kv))
    }

    pub fn thread_locks(&self) -> Result<ThreadLocks> {
        Ok(ThreadLocks::new(self.kv()?, &self.page))
    }

    pub fn cell_locks(&self) -> Result<CellLocks> {
        Ok(CellLocks::new(self.kv()?, &self.page))
    }

    pub fn module_locks(&self) -> Result<ModuleLocks> {
        Ok(ModuleLocks::new(self.kv()?, &self.page))
    }

    pub fn recovery(&self) -> Result<RecoveryManager> {
        Ok(RecoveryManager::new(self.kv()?, self.page.as_str()))
    }

    pub fn print(&self, data: &impl Serialize) -> Result<()> {
        if self.pretty {
            println!("{}", serde_json::to_string_pretty(data)?);
        } else {
            println!("{}", serde_json::to_string(data)?);
        }
        Ok(())
    }
}
