//! Sync Loop (component I): `sync(filters)` and `watch(filters)`.
//!
//! Grounded on the teacher's absence of an equivalent daemon (the
//! teacher's cache server is pushed to explicitly, never swept), so this
//! is built from §4.I directly. The polling `watch()` loop deliberately
//! does not reach for `notify`/inotify — see DESIGN.md's "Deletions from
//! the teacher" table — since the spec only asks for a 1-second mtime
//! poll, matching the original Python implementation's behavior exactly.

use std::path::Path;
use std::time::Duration;

use nixcache_core::error::Result;
use nixcache_core::mime;
use nixcache_core::nix_store::{NixStore, StorePath};
use nixcache_core::store_db::StoreDb;
use regex::Regex;
use tracing::{error, info};

use crate::engine::Engine;
use crate::push;

#[derive(Debug, Clone, Default)]
pub struct SyncFilters {
    /// Paths matching any of these are skipped, unless `whitelist` also
    /// matches.
    pub ignore: Vec<Regex>,
    /// Overrides `ignore` and the drv/tarball skips when it matches.
    pub whitelist: Vec<Regex>,
    pub ignore_drvs: bool,
    pub ignore_tarballs: bool,
}

impl SyncFilters {
    fn skip(&self, store: &NixStore, path: &StorePath) -> bool {
        let name = path.to_string();
        let whitelisted = self.whitelist.iter().any(|r| r.is_match(&name));
        if whitelisted {
            return false;
        }

        if self.ignore.iter().any(|r| r.is_match(&name)) {
            return true;
        }
        if self.ignore_drvs && name.ends_with(".drv") {
            return true;
        }
        if self.ignore_tarballs && mime::sniff_tarball(&store.get_full_path(path)) {
            return true;
        }
        false
    }
}

/// `sync(filters)`: pushes every local path surviving the filters.
pub async fn sync(engine: &Engine, db_path: &Path, filters: &SyncFilters) -> Result<push::SendReport> {
    let db = StoreDb::open(db_path)?;
    let all = db.all_valid_paths()?;

    let mut roots = Vec::new();
    for base_name in all {
        let path = StorePath::from_base_name(base_name)?;
        if !filters.skip(&engine.store, &path) {
            roots.push(path);
        }
    }

    info!(count = roots.len(), "sync: pushing surviving paths");
    push::send(engine, &roots, false).await
}

/// `watch(filters)`: polls the store root's mtime every second, running
/// `sync(filters)` whenever it advances. HTTP errors are logged and
/// swallowed so one failed sync doesn't kill the daemon. Returns the
/// number of completed syncs once `cancellation` is set.
pub async fn watch(engine: &Engine, db_path: &Path, filters: &SyncFilters) -> Result<u64> {
    let mut last_modified = store_mtime(engine.store.store_dir());
    let mut completed = 0u64;

    loop {
        if engine.cancellation.is_cancelled() {
            break;
        }

        tokio::time::sleep(Duration::from_secs(1)).await;

        let current = store_mtime(engine.store.store_dir());
        if current > last_modified {
            last_modified = current;
            match sync(engine, db_path, filters).await {
                Ok(_) => completed += 1,
                Err(e) => error!(error = %e, "sync failed; continuing to watch"),
            }
        }
    }

    Ok(completed)
}

fn store_mtime(store_dir: &Path) -> std::time::SystemTime {
    std::fs::metadata(store_dir)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sp(name: &str) -> StorePath {
        let prefix: String = std::iter::repeat('a').take(32).collect();
        StorePath::from_base_name(PathBuf::from(format!("{prefix}-{name}"))).unwrap()
    }

    /// A throwaway store directory containing `path`'s file, so
    /// `mime::sniff_tarball` has real bytes to read.
    fn store_with(dir: &tempfile::TempDir, path: &StorePath, contents: &[u8]) -> NixStore {
        std::fs::write(dir.path().join(path.base_name()), contents).unwrap();
        NixStore::with_binary(dir.path().to_path_buf(), PathBuf::from("nix-store"))
    }

    #[test]
    fn whitelist_overrides_drv_skip() {
        let dir = tempfile::tempdir().unwrap();
        let path = sp("foo.drv");
        let store = store_with(&dir, &path, b"");
        let filters = SyncFilters {
            ignore: vec![],
            whitelist: vec![Regex::new(r"\.drv$").unwrap()],
            ignore_drvs: true,
            ignore_tarballs: false,
        };
        assert!(!filters.skip(&store, &path));
    }

    #[test]
    fn ignore_drvs_skips_derivations() {
        let dir = tempfile::tempdir().unwrap();
        let drv = sp("foo.drv");
        let other = sp("foo");
        let store = store_with(&dir, &drv, b"");
        std::fs::write(dir.path().join(other.base_name()), b"").unwrap();

        let filters = SyncFilters {
            ignore: vec![],
            whitelist: vec![],
            ignore_drvs: true,
            ignore_tarballs: false,
        };
        assert!(filters.skip(&store, &drv));
        assert!(!filters.skip(&store, &other));
    }

    #[test]
    fn ignore_tarballs_skips_gzip_magic() {
        let dir = tempfile::tempdir().unwrap();
        let archive = sp("foo-src");
        let plain = sp("foo");
        let store = store_with(&dir, &archive, &[0x1f, 0x8b, 0x08, 0x00]);
        std::fs::write(dir.path().join(plain.base_name()), b"plain text").unwrap();

        let filters = SyncFilters {
            ignore: vec![],
            whitelist: vec![],
            ignore_drvs: false,
            ignore_tarballs: true,
        };
        assert!(filters.skip(&store, &archive));
        assert!(!filters.skip(&store, &plain));
    }
}
