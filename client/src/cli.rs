//! Global CLI setup (§6's command list: `send`, `sync`, `daemon`, `fetch`,
//! `build`, `build-derivations`), grounded on the teacher's `cli.rs`
//! (`clap::Parser`/`Subcommand` derive usage, `Opts` wrapper struct) minus
//! its shell-completion and `enum_as_inner` scaffolding, which has no
//! counterpart in the new command set.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::command::build::{self, Build};
use crate::command::build_derivations::{self, BuildDerivations};
use crate::command::daemon::{self, Daemon};
use crate::command::fetch::{self, Fetch};
use crate::command::send::{self, Send};
use crate::command::sync::{self, Sync};

/// Binary cache transfer-engine client.
#[derive(Debug, Parser)]
#[clap(version)]
#[clap(propagate_version = true)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Send(Send),
    Sync(Sync),
    Daemon(Daemon),
    Fetch(Fetch),
    Build(Build),
    BuildDerivations(BuildDerivations),
}

pub async fn run() -> Result<()> {
    let opts = Opts::parse();

    match &opts.command {
        Command::Send(_) => send::run(opts).await,
        Command::Sync(_) => sync::run(opts).await,
        Command::Daemon(_) => daemon::run(opts).await,
        Command::Fetch(_) => fetch::run(opts).await,
        Command::Build(_) => build::run(opts).await,
        Command::BuildDerivations(_) => build_derivations::run(opts).await,
    }
}
