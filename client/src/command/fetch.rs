//! `fetch PATHS…`: pull store paths (and their references) from the
//! cache server.

use anyhow::Result;
use clap::Args;
use nixcache_core::nix_store::StorePath;

use crate::cli::Opts;
use crate::config::EnvConfig;
use crate::engine::Engine;
use crate::pull;

#[derive(Debug, Args)]
pub struct Fetch {
    /// Store paths to fetch.
    paths: Vec<String>,

    #[clap(long)]
    max_jobs: Option<usize>,

    /// Disable batch-fetch mode even if the server supports it.
    #[clap(long)]
    no_batch: bool,
}

pub async fn run(opts: Opts) -> Result<()> {
    let crate::cli::Command::Fetch(args) = &opts.command else {
        unreachable!("dispatched only for Fetch")
    };

    let mut env = EnvConfig::from_env();
    env.no_batch = env.no_batch || args.no_batch;
    let engine = Engine::connect(&env, args.max_jobs).await?;

    let paths: Vec<StorePath> = args
        .paths
        .iter()
        .map(|p| engine.store.parse_store_path(p))
        .collect::<nixcache_core::error::Result<_>>()?;

    let report = pull::fetch(&engine, &paths).await?;
    println!("fetched {} path(s)", report.fetched.len());

    Ok(())
}
