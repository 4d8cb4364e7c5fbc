mod commands;
mod input;
mod opts;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::backup::{BackupArgs, RestoreArgs};
use commands::diff::DiffArgs;
use commands::images::ImagesCommand;
use commands::lock::{LockCommand, UnlockCommand};
use commands::recover::MigrateArgs;
use commands::run::RunArgs;
use opts::PageOpts;

#[derive(Parser, Debug)]
#[command(name = "loom", version, about = "Prompt-grid execution and snapshot CLI")]
struct Cli {
    #[command(flatten)]
    opts: PageOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a grid config against its variable rows
    Run(RunArgs),

    /// Freeze a thread, cell or module value
    #[command(subcommand)]
    Lock(LockCommand),

    /// Release a lock
    #[command(subcommand)]
    Unlock(UnlockCommand),

    /// Export every snapshot of the page as a backup envelope
    Backup(BackupArgs),

    /// Import a backup envelope into the page
    Restore(RestoreArgs),

    /// Structurally compare two snapshot payloads
    Diff(DiffArgs),

    /// Validate and repair the page's snapshot records
    Recover,

    /// Rewrite snapshot metadata versions in place
    Migrate(MigrateArgs),

    /// Image-store maintenance
    #[command(subcommand)]
    Images(ImagesCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    setup_logging();

    let cli = Cli::parse();
    let opts = &cli.opts;

    match cli.command {
        Command::Run(args) => commands::run::cmd_run(opts, &args).await,
        Command::Lock(cmd) => commands::lock::cmd_lock(opts, &cmd),
        Command::Unlock(cmd) => commands::lock::cmd_unlock(opts, &cmd),
        Command::Backup(args) => commands::backup::cmd_backup(opts, &args),
        Command::Restore(args) => commands::backup::cmd_restore(opts, &args),
        Command::Diff(args) => commands::diff::cmd_diff(opts, &args),
        Command::Recover => commands::recover::cmd_recover(opts),
        Command::Migrate(args) => commands::recover::cmd_migrate(opts, &args),
        Command::Images(cmd) => commands::images::cmd_images(opts, &cmd).await,
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
}
