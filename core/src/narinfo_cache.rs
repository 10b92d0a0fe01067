//! Narinfo Cache (component B): server-identity + store path → metadata.
//!
//! Keyed by both the cache server's endpoint authority and the store path,
//! so the same path fetched from two servers never collides. Disk
//! representation is one JSON document per path under a per-server
//! directory; writes are atomic (write-to-tempfile, then rename), matching
//! the teacher's `tempfile`-based atomic-write pattern used elsewhere in
//! `attic/src/nix_store/nix_store.rs`. The memory cache is unbounded (store
//! paths are few relative to available memory); so is the disk cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::narinfo::Narinfo;
use crate::nix_store::StorePath;

#[derive(Clone, Eq, PartialEq, Hash)]
struct Key {
    server: String,
    path: StorePath,
}

pub struct NarinfoCache {
    memory: RwLock<HashMap<Key, Arc<Narinfo>>>,
    base_dir: PathBuf,
    /// Serializes disk writes per server directory; writers serialized,
    /// readers unsynchronized (matching §4.B's concurrency note).
    write_lock: Mutex<()>,
}

impl NarinfoCache {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            base_dir,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns a cached narinfo, checking memory first, then disk.
    pub async fn get(&self, server: &str, path: &StorePath) -> Result<Option<Arc<Narinfo>>> {
        let key = Key {
            server: server.to_string(),
            path: path.clone(),
        };

        if let Some(info) = self.memory.read().await.get(&key) {
            return Ok(Some(info.clone()));
        }

        let disk_path = self.disk_path(server, path);
        match tokio::fs::read(&disk_path).await {
            Ok(bytes) => {
                let info: Narinfo = serde_json::from_slice(&bytes).map_err(|e| {
                    crate::error::Error::MalformedManifest {
                        reason: format!("corrupt narinfo cache entry {disk_path:?}: {e}"),
                    }
                })?;
                let info = Arc::new(info);
                self.memory.write().await.insert(key, info.clone());
                Ok(Some(info))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Inserts a narinfo into memory and atomically writes it to disk.
    pub async fn insert(&self, server: &str, path: &StorePath, info: Narinfo) -> Result<()> {
        let key = Key {
            server: server.to_string(),
            path: path.clone(),
        };
        let info = Arc::new(info);

        self.memory.write().await.insert(key, info.clone());

        let disk_path = self.disk_path(server, path);
        let server_dir = disk_path.parent().expect("disk_path has a parent").to_owned();

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&server_dir).await?;

        let json = serde_json::to_vec_pretty(info.as_ref()).map_err(|e| {
            crate::error::Error::MalformedManifest {
                reason: format!("failed to serialize narinfo: {e}"),
            }
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&server_dir)?;
        std::io::Write::write_all(&mut tmp, &json)?;
        tmp.persist(&disk_path).map_err(|e| e.error)?;

        Ok(())
    }

    fn disk_path(&self, server: &str, path: &StorePath) -> PathBuf {
        self.base_dir
            .join(sanitize_server(server))
            .join(format!("{}.json", path.to_hash()))
    }
}

/// Authorities may contain `:` (port separators); replace characters that
/// don't belong in a path component.
fn sanitize_server(server: &str) -> String {
    server.replace([':', '/'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::narinfo::Compression;
    use std::path::PathBuf as StdPathBuf;

    fn sp(hash_seed: char, name: &str) -> StorePath {
        let prefix: String = std::iter::repeat(hash_seed).take(32).collect();
        StorePath::from_base_name(StdPathBuf::from(format!("{prefix}-{name}"))).unwrap()
    }

    fn sample_narinfo(path: &StorePath) -> Narinfo {
        Narinfo {
            store_path: PathBuf::from(format!("/nix/store/{path}")),
            url: "nar/abc.nar.xz".to_string(),
            compression: Compression::Xz,
            file_hash: None,
            file_size: None,
            nar_hash: Hash::sha256_from_bytes(b"test"),
            nar_size: 42,
            references: vec![],
            deriver: None,
            signatures: vec![],
            system: None,
        }
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = NarinfoCache::new(dir.path().to_owned());

        let path = sp('a', "a");
        let info = sample_narinfo(&path);
        cache
            .insert("cache.example.com", &path, info.clone())
            .await
            .unwrap();

        // Force a disk read by constructing a fresh cache instance.
        let cache2 = NarinfoCache::new(dir.path().to_owned());
        let fetched = cache2.get("cache.example.com", &path).await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().nar_size, 42);
    }

    #[tokio::test]
    async fn different_servers_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let cache = NarinfoCache::new(dir.path().to_owned());

        let path = sp('a', "a");
        let mut info_a = sample_narinfo(&path);
        info_a.nar_size = 1;
        let mut info_b = sample_narinfo(&path);
        info_b.nar_size = 2;

        cache.insert("server-a", &path, info_a).await.unwrap();
        cache.insert("server-b", &path, info_b).await.unwrap();

        assert_eq!(cache.get("server-a", &path).await.unwrap().unwrap().nar_size, 1);
        assert_eq!(cache.get("server-b", &path).await.unwrap().unwrap().nar_size, 2);
    }

    #[tokio::test]
    async fn missing_entry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = NarinfoCache::new(dir.path().to_owned());
        let path = sp('a', "a");
        assert!(cache.get("server-a", &path).await.unwrap().is_none());
    }
}
