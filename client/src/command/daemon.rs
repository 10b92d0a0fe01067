//! `daemon`: like `sync`, but watches the store root and re-syncs on
//! every change until interrupted.

use anyhow::Result;
use clap::Args;

use crate::cli::Opts;
use crate::command::sync::Sync;
use crate::config::EnvConfig;
use crate::engine::Engine;
use crate::sync as sync_loop;

/// Accepts the same flags as `sync`, per §6.
#[derive(Debug, Args)]
pub struct Daemon {
    #[clap(flatten)]
    sync: Sync,
}

pub async fn run(opts: Opts) -> Result<()> {
    let crate::cli::Command::Daemon(args) = &opts.command else {
        unreachable!("dispatched only for Daemon")
    };

    let env = EnvConfig::from_env();
    let engine = Engine::connect(&env, args.sync.max_jobs).await?;
    let filters = args.sync.filters()?;
    let db_path = engine.db_path();

    let completed = sync_loop::watch(&engine, &db_path, &filters).await?;
    println!("completed {completed} sync(s)");

    Ok(())
}
