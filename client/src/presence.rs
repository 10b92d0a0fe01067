//! Presence Oracle (component E): does the server already have a path?
//!
//! Prefers a single bulk `GET /query-paths`; a `404` means the server
//! doesn't support it, so callers fall back to probing each path's
//! narinfo individually through a bounded worker pool. Grounded on the
//! teacher's `client/src/push.rs` worker-pool shape (`async_channel`
//! bounded fan-out over a fixed number of spawned tasks), generalized
//! from uploads to narinfo-existence probes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_channel as channel;
use nixcache_core::error::Result;
use nixcache_core::nix_store::{NixStore, StorePath};
use nixcache_core::session::Session;
use reqwest::{Method, StatusCode};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Tracks paths already confirmed present on the server during one
/// pipeline run, so repeat queries are skipped (§4.E).
#[derive(Default)]
pub struct ObjectsOnServer(Mutex<HashSet<StorePath>>);

impl ObjectsOnServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, path: &StorePath) -> bool {
        self.0.lock().await.contains(path)
    }

    pub async fn insert_all(&self, paths: impl IntoIterator<Item = StorePath>) {
        self.0.lock().await.extend(paths);
    }
}

pub struct PresenceOracle {
    session: Arc<Session>,
    store: Arc<NixStore>,
    workers: usize,
}

impl PresenceOracle {
    pub fn new(session: Arc<Session>, store: Arc<NixStore>, workers: usize) -> Self {
        Self { session, store, workers }
    }

    /// Queries presence of `paths`, merging results into `known`.
    /// Returns a map of every queried path to whether it's present.
    pub async fn query(
        &self,
        paths: &[StorePath],
        known: &ObjectsOnServer,
    ) -> Result<HashMap<StorePath, bool>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }

        match self.query_bulk(paths).await {
            Ok(result) => {
                let present = result
                    .iter()
                    .filter_map(|(p, v)| v.then(|| p.clone()));
                known.insert_all(present).await;
                Ok(result)
            }
            Err(BulkQueryError::Unsupported) => self.query_per_path(paths, known).await,
            Err(BulkQueryError::Other(e)) => Err(e),
        }
    }

    async fn query_bulk(&self, paths: &[StorePath]) -> std::result::Result<HashMap<StorePath, bool>, BulkQueryError> {
        let body: Vec<String> = paths
            .iter()
            .map(|p| self.store.get_full_path(p).to_string_lossy().into_owned())
            .collect();
        let json = serde_json::to_vec(&body).expect("paths serialize");

        let response = self
            .session
            .request(Method::GET, "query-paths", Some(reqwest::Body::from(json)))
            .await
            .map_err(BulkQueryError::Other)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BulkQueryError::Unsupported);
        }

        let map: HashMap<String, bool> = response
            .json()
            .await
            .map_err(|e| BulkQueryError::Other(nixcache_core::error::Error::CouldNotConnect {
                endpoint: self.session.endpoint().to_string(),
                reason: e.to_string(),
            }))?;

        let mut out = HashMap::with_capacity(paths.len());
        for p in paths {
            let full_path = self.store.get_full_path(p).to_string_lossy().into_owned();
            let present = map.get(&full_path).copied().unwrap_or(false);
            out.insert(p.clone(), present);
        }
        Ok(out)
    }

    async fn query_per_path(
        &self,
        paths: &[StorePath],
        known: &ObjectsOnServer,
    ) -> Result<HashMap<StorePath, bool>> {
        let (tx, rx) = channel::bounded::<StorePath>(paths.len().max(1));
        for p in paths {
            tx.send(p.clone()).await.expect("receiver alive");
        }
        tx.close();

        let results: Arc<Mutex<HashMap<StorePath, bool>>> =
            Arc::new(Mutex::new(HashMap::with_capacity(paths.len())));

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for _ in 0..self.workers.min(paths.len()).max(1) {
            let rx = rx.clone();
            let session = self.session.clone();
            let results = results.clone();
            handles.push(tokio::spawn(async move {
                while let Ok(path) = rx.recv().await {
                    let present = probe_one(&session, &path).await.unwrap_or(false);
                    results.lock().await.insert(path, present);
                }
            }));
        }

        for h in handles {
            let _ = h.await;
        }

        let results = Arc::try_unwrap(results).unwrap().into_inner();
        let present = results.iter().filter_map(|(p, v)| v.then(|| p.clone()));
        known.insert_all(present).await;
        Ok(results)
    }
}

async fn probe_one(session: &Session, path: &StorePath) -> Result<bool> {
    let hash_prefix = path.to_hash();
    let route = format!("{hash_prefix}.narinfo");
    let response = session.request(Method::GET, &route, None).await?;
    Ok(response.status().is_success())
}

enum BulkQueryError {
    Unsupported,
    Other(nixcache_core::error::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sp(hash_seed: char, name: &str) -> StorePath {
        let prefix: String = std::iter::repeat(hash_seed).take(32).collect();
        StorePath::from_base_name(PathBuf::from(format!("{prefix}-{name}"))).unwrap()
    }

    #[tokio::test]
    async fn objects_on_server_tracks_insertions() {
        let known = ObjectsOnServer::new();
        let a = sp('a', "a");
        assert!(!known.contains(&a).await);
        known.insert_all([a.clone()]).await;
        assert!(known.contains(&a).await);
    }
}
