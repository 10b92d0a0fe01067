//! Pull Pipeline (component G): `fetch(paths)`.
//!
//! Two cooperating modes per §4.G: batch (preferred, falls back to
//! per-path on an unsupported-route signal) and per-path (worker pool
//! with per-item futures). Grounded on the teacher's absence of an
//! equivalent — the teacher fetches exclusively through `libnixstore`'s
//! substituter machinery — so both submodules are built from the spec's
//! algorithm directly, in the idiom established by this crate's other
//! pipelines (`push.rs`, `presence.rs`).

mod batch;
mod perpath;

use nixcache_core::error::Result;
use nixcache_core::nix_store::StorePath;
use tracing::warn;

use crate::engine::Engine;

pub use perpath::PerPathFetcher;

/// Outcome of a `fetch` call: every path verified present in the local
/// store by the end of the run.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub fetched: Vec<StorePath>,
}

/// `fetch(paths)`: pulls `paths` and their transitive references.
///
/// Tries batch mode first unless `no_batch` is set; a `4xx` from
/// `/init-batch-fetch` disables batch for the rest of the run and falls
/// through to per-path mode.
pub async fn fetch(engine: &Engine, paths: &[StorePath]) -> Result<FetchReport> {
    if paths.is_empty() {
        return Ok(FetchReport::default());
    }

    if !engine.no_batch {
        match batch::fetch_batch(engine, paths).await {
            Ok(report) => return Ok(report),
            Err(nixcache_core::error::Error::OperationNotSupported { .. }) => {
                warn!("server does not support batch fetch; falling back to per-path mode");
            }
            Err(e) => return Err(e),
        }
    }

    perpath::fetch_per_path(engine, paths).await
}
