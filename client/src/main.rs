#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

mod build;
mod cancellation;
mod cli;
mod command;
mod compression;
mod config;
mod engine;
mod planner;
mod presence;
mod pull;
mod push;
mod sync;
mod version;

use anyhow::Result;

use crate::config::EnvConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    cli::run().await
}

/// Initializes `tracing-subscriber` from `LOG_LEVEL` (§6), defaulting to
/// `info` when unset, matching the teacher's `init_logging()`.
fn init_logging() {
    let env = EnvConfig::from_env();
    let filter = env
        .log_level
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
