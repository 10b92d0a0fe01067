//! Per-path mode: one worker per store path, dependency-ordered via a
//! completion signal per path, bounded to `max_jobs` concurrent fetches
//! by a semaphore (§4.G, §5's "two logically separate pools" — the pull
//! side's fetch pool).
//!
//! The spec's "FetchFuture map guarded by a single mutex" dedup
//! invariant is realized here as a mutex-guarded map from path to a
//! shared completion signal (`tokio::sync::Notify` plus an outcome
//! slot): at most one task is ever spawned per path, and every other
//! reference to that path waits on the same signal instead of redoing
//! the work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nixcache_core::closure::{ClosureEngine, ReferenceSource};
use nixcache_core::error::{Error, Result};
use nixcache_core::narinfo::Narinfo;
use nixcache_core::nix_store::StorePath;
use reqwest::Method;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;

use super::FetchReport;
use crate::compression;
use crate::engine::Engine;

const MAX_IMPORT_RETRIES: u32 = 3;

pub struct PerPathFetcher;

/// Falls back to a server-fetched narinfo's references when the local
/// reference cache doesn't know a path yet (§4.D's `query_server=true`
/// branch).
struct ServerFallbackSource<'a> {
    engine: &'a Engine,
}

#[async_trait]
impl<'a> ReferenceSource for ServerFallbackSource<'a> {
    async fn references(&self, path: &StorePath) -> Result<Vec<StorePath>> {
        match self.engine.reference_cache.references(path).await {
            Ok(refs) => Ok(refs),
            Err(Error::NoSuchObject { .. }) => {
                let info = fetch_narinfo(self.engine, path).await?;
                let refs: Result<Vec<StorePath>> = info
                    .references
                    .iter()
                    .filter(|r| r.as_str() != path.to_string())
                    .map(|r| StorePath::from_base_name(std::path::PathBuf::from(r.clone())))
                    .collect();
                let refs = refs?;
                self.engine.reference_cache.record(path, &refs).await?;
                Ok(refs)
            }
            Err(e) => Err(e),
        }
    }
}

async fn fetch_narinfo(engine: &Engine, path: &StorePath) -> Result<Arc<Narinfo>> {
    let server = engine.session.server_identity();
    if let Some(cached) = engine.narinfo_cache.get(&server, path).await? {
        return Ok(cached);
    }

    let route = format!("{}.narinfo", path.to_hash());
    let response = engine.session.request(Method::GET, &route, None).await?;
    if !response.status().is_success() {
        return Err(Error::NoSuchObject {
            path: path.to_string(),
        });
    }

    let text = response.text().await.map_err(|e| Error::CouldNotConnect {
        endpoint: engine.session.endpoint().to_string(),
        reason: e.to_string(),
    })?;
    let info = Narinfo::parse(&text)?;
    engine.narinfo_cache.insert(&server, path, info.clone()).await?;
    Ok(Arc::new(info))
}

/// True if `path` is already registered in the reference cache or present
/// on disk, in which case a worker job returns immediately instead of
/// re-fetching (§4.G).
async fn already_present(engine: &Engine, path: &StorePath) -> bool {
    if engine.reference_cache.references(path).await.is_ok() {
        return true;
    }
    std::path::Path::new(&engine.store.get_full_path(path)).exists()
}

struct PathState {
    notify: Notify,
    done: AtomicBool,
    failed: Mutex<Option<String>>,
}

pub async fn fetch_per_path(engine: &Engine, paths: &[StorePath]) -> Result<FetchReport> {
    let source = ServerFallbackSource { engine };
    let closure_engine = ClosureEngine::new(&source);
    let ordered = closure_engine.ordered_closure(paths).await?;

    let mut states: HashMap<StorePath, Arc<PathState>> = HashMap::with_capacity(ordered.len());
    for path in &ordered {
        states.insert(
            path.clone(),
            Arc::new(PathState {
                notify: Notify::new(),
                done: AtomicBool::new(false),
                failed: Mutex::new(None),
            }),
        );
    }
    let states = Arc::new(states);

    let semaphore = Arc::new(Semaphore::new(engine.max_jobs.max(1)));
    let mut set: JoinSet<Result<StorePath>> = JoinSet::new();

    for path in ordered {
        let engine = engine.clone();
        let states = states.clone();
        let semaphore = semaphore.clone();

        set.spawn(async move {
            let refs = engine.reference_cache.references(&path).await.unwrap_or_default();
            for r in &refs {
                if let Some(dep_state) = states.get(r) {
                    while !dep_state.done.load(Ordering::SeqCst) {
                        dep_state.notify.notified().await;
                    }
                    if let Some(reason) = dep_state.failed.lock().await.clone() {
                        return Err(Error::NoSuchObject {
                            path: format!("{path} (blocked by failed dependency: {reason})"),
                        });
                    }
                }
            }

            engine.cancellation.check()?;

            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let result = fetch_one(&engine, &path).await;

            let my_state = states.get(&path).expect("state exists for every ordered path");
            if let Err(e) = &result {
                *my_state.failed.lock().await = Some(e.to_string());
            }
            my_state.done.store(true, Ordering::SeqCst);
            my_state.notify.notify_waiters();

            result.map(|()| path)
        });
    }

    let mut fetched = Vec::new();
    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        match joined.expect("task did not panic") {
            Ok(path) => fetched.push(path),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(FetchReport { fetched })
}

async fn fetch_one(engine: &Engine, path: &StorePath) -> Result<()> {
    if already_present(engine, path).await {
        return Ok(());
    }

    for attempt in 0..MAX_IMPORT_RETRIES {
        engine.cancellation.check()?;

        match try_fetch_one(engine, path).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < MAX_IMPORT_RETRIES => {
                tracing::warn!(%path, attempt, error = %e, "retrying fetch");
            }
            Err(_) => {
                return Err(Error::ObjectNotBuilt {
                    path: path.to_string(),
                })
            }
        }
    }
    unreachable!("loop always returns")
}

async fn try_fetch_one(engine: &Engine, path: &StorePath) -> Result<()> {
    let info = fetch_narinfo(engine, path).await?;

    let response = engine.session.request(Method::GET, &info.url, None).await?;
    if !response.status().is_success() {
        return Err(Error::NoSuchObject {
            path: path.to_string(),
        });
    }
    let compressed = response.bytes().await.map_err(|e| Error::CouldNotConnect {
        endpoint: engine.session.endpoint().to_string(),
        reason: e.to_string(),
    })?;

    let mut reader = compression::decompress(&compressed[..], info.compression);
    let mut nar_bytes = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut nar_bytes).await?;

    let references: Result<Vec<StorePath>> = info
        .references
        .iter()
        .filter(|r| r.as_str() != path.to_string())
        .map(|r| StorePath::from_base_name(std::path::PathBuf::from(r.clone())))
        .collect();
    let references = references?;
    let deriver = info
        .deriver
        .as_ref()
        .map(|d| StorePath::from_base_name(std::path::PathBuf::from(d.clone())))
        .transpose()?;

    let mut export = Vec::new();
    nixcache_core::export::write_export(
        &mut export,
        &engine.store.store_dir().to_string_lossy(),
        &nar_bytes,
        path,
        &references,
        deriver.as_ref(),
    )?;

    let imported = engine.store.import(&export).await?;
    if &imported != path {
        return Err(Error::ObjectNotBuilt {
            path: path.to_string(),
        });
    }

    engine.reference_cache.record(path, &references).await?;
    Ok(())
}
