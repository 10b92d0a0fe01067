//! `sync [--ignore R…] [--no-ignore R…] [--(no-)ignore-drvs] [--(no-)ignore-tarballs]`:
//! push every local path surviving the filters, once.

use anyhow::{Context, Result};
use clap::Args;
use regex::Regex;

use crate::cli::Opts;
use crate::config::EnvConfig;
use crate::engine::Engine;
use crate::sync::{self, SyncFilters};

#[derive(Debug, Args)]
pub struct Sync {
    #[clap(long = "ignore")]
    ignore: Vec<String>,

    #[clap(long = "no-ignore")]
    no_ignore: Vec<String>,

    #[clap(long)]
    ignore_drvs: bool,

    #[clap(long)]
    no_ignore_drvs: bool,

    #[clap(long)]
    ignore_tarballs: bool,

    #[clap(long)]
    no_ignore_tarballs: bool,

    #[clap(long)]
    max_jobs: Option<usize>,
}

impl Sync {
    pub(crate) fn filters(&self) -> Result<SyncFilters> {
        let ignore = self
            .ignore
            .iter()
            .map(|s| Regex::new(s).with_context(|| format!("invalid --ignore regex {s:?}")))
            .collect::<Result<_>>()?;
        let whitelist = self
            .no_ignore
            .iter()
            .map(|s| Regex::new(s).with_context(|| format!("invalid --no-ignore regex {s:?}")))
            .collect::<Result<_>>()?;

        Ok(SyncFilters {
            ignore,
            whitelist,
            ignore_drvs: self.ignore_drvs && !self.no_ignore_drvs,
            ignore_tarballs: self.ignore_tarballs && !self.no_ignore_tarballs,
        })
    }
}

pub async fn run(opts: Opts) -> Result<()> {
    let crate::cli::Command::Sync(args) = &opts.command else {
        unreachable!("dispatched only for Sync")
    };

    let env = EnvConfig::from_env();
    let engine = Engine::connect(&env, args.max_jobs).await?;
    let filters = args.filters()?;
    let db_path = engine.db_path();

    let report = sync::sync(&engine, &db_path, &filters).await?;
    println!(
        "sent {} path(s), {} already present",
        report.sent.len(),
        report.skipped.len()
    );

    Ok(())
}
