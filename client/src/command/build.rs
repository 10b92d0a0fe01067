//! `build -P DIR [ATTRS…]`: instantiate attributes under a Nix
//! expression directory, fetch what the cache already has, build the
//! rest locally.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::build::{self, BuildOptions};
use crate::cli::Opts;
use crate::config::EnvConfig;
use crate::engine::Engine;
use crate::planner::NixInstantiatePlanner;

#[derive(Debug, Args)]
pub struct Build {
    /// Directory containing the Nix expression to instantiate (e.g. a
    /// checkout with a `release.nix` / `default.nix`).
    #[clap(short = 'P', long = "package-dir")]
    package_dir: PathBuf,

    /// Attribute names to build; defaults to `default` if empty.
    attrs: Vec<String>,

    #[clap(long)]
    max_jobs: Option<usize>,

    #[clap(long)]
    stop_on_failure: bool,

    /// Create `./result[-<attr>]` GC root symlinks for built/fetched
    /// outputs.
    #[clap(long)]
    add_gc_roots: bool,
}

pub async fn run(opts: Opts) -> Result<()> {
    let crate::cli::Command::Build(args) = &opts.command else {
        unreachable!("dispatched only for Build")
    };

    let env = EnvConfig::from_env();
    let engine = Engine::connect(&env, args.max_jobs).await?;

    let attrs = if args.attrs.is_empty() {
        vec!["default".to_string()]
    } else {
        args.attrs.clone()
    };

    let planner = NixInstantiatePlanner::new(&engine, args.package_dir.clone(), attrs);
    let build_opts = BuildOptions {
        stop_on_failure: args.stop_on_failure,
        max_jobs: args.max_jobs.map(|j| j as u32),
        add_gc_roots: args.add_gc_roots,
    };

    let report = build::build(&engine, &planner, &[], build_opts).await?;
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
