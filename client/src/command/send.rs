//! `send PATHS…`: push store paths to the cache server.

use anyhow::Result;
use clap::Args;
use nixcache_core::nix_store::StorePath;

use crate::cli::Opts;
use crate::config::EnvConfig;
use crate::engine::Engine;
use crate::push;

#[derive(Debug, Args)]
pub struct Send {
    /// Store paths to send.
    paths: Vec<String>,

    #[clap(long)]
    max_jobs: Option<usize>,

    /// Compute and print what would be sent without transferring anything.
    #[clap(long)]
    dry_run: bool,
}

pub async fn run(opts: Opts) -> Result<()> {
    let crate::cli::Command::Send(args) = &opts.command else {
        unreachable!("dispatched only for Send")
    };

    let env = EnvConfig::from_env();
    let engine = Engine::connect(&env, args.max_jobs).await?;

    let roots: Vec<StorePath> = args
        .paths
        .iter()
        .map(|p| engine.store.parse_store_path(p))
        .collect::<nixcache_core::error::Result<_>>()?;

    let report = push::send(&engine, &roots, args.dry_run).await?;
    println!(
        "sent {} path(s), {} already present",
        report.sent.len(),
        report.skipped.len()
    );

    Ok(())
}
