//! Reference Cache (component A): store path → direct references.
//!
//! Lookup order: in-memory map, then the on-disk index, then the local
//! store database, failing with `NoSuchObject` if none resolve it. A
//! higher layer (the Closure Engine, when `query_server` is set) may fall
//! back further to a server-fetched narinfo on `NoSuchObject` — that is
//! outside this cache's responsibility.
//!
//! Safe for parallel readers and writers: the in-memory map is guarded by
//! an `RwLock`; the on-disk layer is append-only and write-through,
//! tolerating duplicate, identical writes (store paths are immutable, so a
//! racing writer can only ever write the same reference list twice).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};

use crate::closure::ReferenceSource;
use crate::error::{Error, Result};
use crate::nix_store::StorePath;
use crate::store_db::StoreDb;

pub struct ReferenceCache {
    memory: RwLock<HashMap<StorePath, Vec<StorePath>>>,
    index_path: PathBuf,
    write_lock: Mutex<()>,
    store_dir: PathBuf,
    db: Option<StoreDb>,
}

impl ReferenceCache {
    /// Opens (creating if needed) the on-disk index at `index_path`,
    /// loading its current contents into memory. `db`, if given, is
    /// consulted on a cache miss.
    pub async fn open(index_path: PathBuf, store_dir: PathBuf, db: Option<StoreDb>) -> Result<Self> {
        let memory = load_index(&index_path).await?;

        Ok(Self {
            memory: RwLock::new(memory),
            index_path,
            write_lock: Mutex::new(()),
            store_dir,
            db,
        })
    }

    /// Returns the direct references of `path`, excluding `path` itself.
    pub async fn references(&self, path: &StorePath) -> Result<Vec<StorePath>> {
        if let Some(refs) = self.memory.read().await.get(path) {
            return Ok(refs.clone());
        }

        // Re-check the on-disk index: another process sharing the same
        // cache directory may have written an entry since we loaded.
        if let Some(refs) = lookup_in_file(&self.index_path, path).await? {
            self.memory
                .write()
                .await
                .insert(path.clone(), refs.clone());
            return Ok(refs);
        }

        if let Some(db) = &self.db {
            let refs = db.references(&self.store_dir, path)?;
            let refs: Result<Vec<StorePath>> = refs
                .into_iter()
                .map(StorePath::from_base_name)
                .collect();
            let refs = refs?;
            self.record(path, &refs).await?;
            return Ok(refs);
        }

        Err(Error::NoSuchObject {
            path: path.to_string(),
        })
    }

    /// Idempotent write: records `refs` as the direct references of `path`.
    pub async fn record(&self, path: &StorePath, refs: &[StorePath]) -> Result<()> {
        self.memory
            .write()
            .await
            .insert(path.clone(), refs.to_vec());

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)
            .await?;

        let line = format!(
            "{}\t{}\n",
            path,
            refs.iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl ReferenceSource for ReferenceCache {
    async fn references(&self, path: &StorePath) -> Result<Vec<StorePath>> {
        ReferenceCache::references(self, path).await
    }
}

async fn load_index(path: &Path) -> Result<HashMap<StorePath, Vec<StorePath>>> {
    let mut map = HashMap::new();
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some((p, refs)) = parse_index_line(&line) {
            map.insert(p, refs);
        }
    }
    Ok(map)
}

/// Scans the on-disk index for a single entry without loading the whole
/// file into memory; used for the second lookup step.
async fn lookup_in_file(path: &Path, target: &StorePath) -> Result<Option<Vec<StorePath>>> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut lines = BufReader::new(file).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some((p, refs)) = parse_index_line(&line) {
            if &p == target {
                return Ok(Some(refs));
            }
        }
    }
    Ok(None)
}

fn parse_index_line(line: &str) -> Option<(StorePath, Vec<StorePath>)> {
    let (path_str, refs_str) = line.split_once('\t')?;
    let path = StorePath::from_base_name(PathBuf::from(path_str)).ok()?;
    let refs = refs_str
        .split_whitespace()
        .filter_map(|s| StorePath::from_base_name(PathBuf::from(s)).ok())
        .collect();
    Some((path, refs))
}

/// Shared, cloneable handle, used by pipelines that need to pass the cache
/// across worker tasks.
pub type SharedReferenceCache = Arc<ReferenceCache>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(hash_seed: char, name: &str) -> StorePath {
        let prefix: String = std::iter::repeat(hash_seed).take(32).collect();
        StorePath::from_base_name(PathBuf::from(format!("{prefix}-{name}"))).unwrap()
    }

    #[tokio::test]
    async fn records_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("refs.idx");
        let cache = ReferenceCache::open(index_path, PathBuf::from("/nix/store"), None)
            .await
            .unwrap();

        let a = sp('a', "a");
        let b = sp('b', "b");
        cache.record(&a, &[b.clone()]).await.unwrap();

        let refs = cache.references(&a).await.unwrap();
        assert_eq!(refs, vec![b]);
    }

    #[tokio::test]
    async fn missing_path_without_db_is_no_such_object() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("refs.idx");
        let cache = ReferenceCache::open(index_path, PathBuf::from("/nix/store"), None)
            .await
            .unwrap();

        let a = sp('a', "a");
        assert!(matches!(
            cache.references(&a).await,
            Err(Error::NoSuchObject { .. })
        ));
    }

    #[tokio::test]
    async fn reopening_reloads_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("refs.idx");

        let a = sp('a', "a");
        let b = sp('b', "b");
        {
            let cache = ReferenceCache::open(index_path.clone(), PathBuf::from("/nix/store"), None)
                .await
                .unwrap();
            cache.record(&a, &[b.clone()]).await.unwrap();
        }

        let cache = ReferenceCache::open(index_path, PathBuf::from("/nix/store"), None)
            .await
            .unwrap();
        assert_eq!(cache.references(&a).await.unwrap(), vec![b]);
    }
}
