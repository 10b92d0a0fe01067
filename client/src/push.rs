//! Push Pipeline (component F): `send(paths)`.
//!
//! Grounded on the teacher's `Pusher`/`upload_path` in `client/src/push.rs`
//! (the per-path upload shape, `ApiClient`-style request issuing) but
//! redesigned around §4.F's exact algorithm: closure, bulk-then-per-path
//! presence diffing, then strictly sequential in-reference-order export
//! and POST, instead of the teacher's unordered worker pool — the spec's
//! ordering guarantee (a path is sent only after its references are
//! already on the server) is simplest to keep correct emitted serially.

use nixcache_core::closure::ClosureEngine;
use nixcache_core::error::Result;
use nixcache_core::nix_store::{NixStore, StorePath};
use reqwest::Method;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::compression;
use crate::engine::Engine;
use crate::presence::{ObjectsOnServer, PresenceOracle};

/// Outcome of a `send` call.
pub struct SendReport {
    /// Paths confirmed (or made) present on the server, in closure order.
    pub sent: Vec<StorePath>,
    /// Paths that were already present and thus skipped.
    pub skipped: Vec<StorePath>,
}

/// `send(paths)`: pushes `roots` and their transitive references.
///
/// `dry_run` short-circuits after presence diffing (step 2), printing up
/// to `show_paths_limit` basenames instead of transferring anything.
pub async fn send(engine: &Engine, roots: &[StorePath], dry_run: bool) -> Result<SendReport> {
    let closure_engine = ClosureEngine::new(engine.reference_cache.as_ref());
    let ordered = closure_engine.ordered_closure(roots).await?;

    let known = ObjectsOnServer::new();
    let oracle = PresenceOracle::new(engine.session.clone(), engine.store.clone(), engine.max_jobs);
    let presence = oracle.query(&ordered, &known).await?;

    let mut remaining: Vec<StorePath> = Vec::new();
    let mut skipped: Vec<StorePath> = Vec::new();
    for path in &ordered {
        if presence.get(path).copied().unwrap_or(false) {
            skipped.push(path.clone());
        } else {
            remaining.push(path.clone());
        }
    }

    if dry_run {
        for path in remaining.iter().take(engine.show_paths_limit) {
            info!(%path, "would send");
        }
        return Ok(SendReport {
            sent: Vec::new(),
            skipped,
        });
    }

    let mut nar_upload_enabled = engine.send_nars;
    let mut sent = Vec::new();

    for path in remaining {
        engine.cancellation.check()?;

        if nar_upload_enabled {
            match upload_nar(engine, &engine.store, &path).await {
                Ok(()) => {}
                Err(nixcache_core::error::Error::OperationNotSupported { .. }) => {
                    warn!("server does not support NAR upload; disabling for this run");
                    nar_upload_enabled = false;
                }
                Err(e) => return Err(e),
            }
        }

        send_one(engine, &engine.store, &path).await?;
        known.insert_all([path.clone()]).await;
        sent.push(path);
    }

    Ok(SendReport { sent, skipped })
}

async fn send_one(engine: &Engine, store: &NixStore, path: &StorePath) -> Result<()> {
    engine.cancellation.check()?;

    let export_bytes = store.export(path).await?;
    let mut reader = compression::compress(&export_bytes[..], nixcache_core::narinfo::Compression::Gzip);
    let mut compressed = Vec::new();
    reader.read_to_end(&mut compressed).await?;

    let response = engine
        .session
        .request(Method::POST, "import-path", Some(reqwest::Body::from(compressed)))
        .await?;

    if !response.status().is_success() {
        return Err(nixcache_core::error::Error::NixImportFailed {
            reason: format!(
                "server rejected import of {path} with status {}",
                response.status()
            ),
        });
    }

    Ok(())
}

/// Uploads a path's NAR archive to `/upload-nar/{compression}/{basename}`.
/// A `404` surfaces as `OperationNotSupported` so the caller can disable
/// NAR-upload for the rest of the run.
async fn upload_nar(engine: &Engine, store: &NixStore, path: &StorePath) -> Result<()> {
    let export_bytes = store.export(path).await?;
    let route = format!(
        "upload-nar/{}/{}",
        engine.compression.http_value(),
        path.base_name().display()
    );

    let response = engine
        .session
        .request(Method::POST, &route, Some(reqwest::Body::from(export_bytes)))
        .await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(nixcache_core::error::Error::OperationNotSupported { route: "upload-nar" });
    }
    if !response.status().is_success() {
        return Err(nixcache_core::error::Error::NixImportFailed {
            reason: format!("NAR upload of {path} failed with status {}", response.status()),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_report_tracks_sent_and_skipped_separately() {
        let report = SendReport {
            sent: Vec::new(),
            skipped: Vec::new(),
        };
        assert!(report.sent.is_empty());
        assert!(report.skipped.is_empty());
    }
}
