//! `build-derivations [DRVS…] [-f FILE]`: build explicit derivation
//! paths, fetching outputs the cache already has.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use nixcache_core::nix_store::StorePath;

use crate::build::{self, BuildOptions};
use crate::cli::Opts;
use crate::config::EnvConfig;
use crate::engine::Engine;
use crate::planner::DerivationListPlanner;

#[derive(Debug, Args)]
pub struct BuildDerivations {
    /// Derivation store paths to build.
    drvs: Vec<String>,

    /// File containing one derivation path per line, merged with `drvs`.
    #[clap(short = 'f', long = "file")]
    file: Option<PathBuf>,

    #[clap(long)]
    max_jobs: Option<usize>,

    #[clap(long)]
    stop_on_failure: bool,

    #[clap(long)]
    add_gc_roots: bool,
}

pub async fn run(opts: Opts) -> Result<()> {
    let crate::cli::Command::BuildDerivations(args) = &opts.command else {
        unreachable!("dispatched only for BuildDerivations")
    };

    let env = EnvConfig::from_env();
    let engine = Engine::connect(&env, args.max_jobs).await?;

    let mut raw_paths = args.drvs.clone();
    if let Some(file) = &args.file {
        let contents = std::fs::read_to_string(file)
            .with_context(|| format!("reading {file:?}"))?;
        raw_paths.extend(contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from));
    }

    let drvs: Vec<StorePath> = raw_paths
        .iter()
        .map(|p| engine.store.parse_store_path(p))
        .collect::<nixcache_core::error::Result<_>>()?;

    let planner = DerivationListPlanner::new(&engine);
    let build_opts = BuildOptions {
        stop_on_failure: args.stop_on_failure,
        max_jobs: args.max_jobs.map(|j| j as u32),
        add_gc_roots: args.add_gc_roots,
    };

    let report = build::build(&engine, &planner, &drvs, build_opts).await?;
    println!(
        "built {}, fetched {}, failed {}, blocked {}",
        report.built.len(),
        report.fetched.len(),
        report.failed.len(),
        report.blocked.len()
    );

    if !report.failed.is_empty() {
        anyhow::bail!("{} derivation(s) failed", report.failed.len());
    }

    Ok(())
}
