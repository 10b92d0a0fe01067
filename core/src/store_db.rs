//! Read-only access to the local store's SQLite database.
//!
//! The `nix-store` subprocess contract (§6) documents only `--export`,
//! `--import`, `--realise`, `--add-root` and `--delete`; there is no
//! subprocess flag for "list every valid path" or "list a path's direct
//! references" in bulk. Both the Reference Cache's on-miss fallback (§4.A)
//! and the Sync Loop's enumeration (§4.I) instead read `db/db.sqlite`
//! directly, mirroring the original Python implementation's
//! `sqlite3.connect(db_path)` usage.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::error::Result;
use crate::nix_store::StorePath;

/// A read-only handle to `<store_dir>/../db/db.sqlite` (conventionally
/// `/nix/var/nix/db/db.sqlite`).
pub struct StoreDb {
    conn: Connection,
}

impl StoreDb {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// Returns the base names of every valid path in the store.
    pub fn all_valid_paths(&self) -> Result<Vec<PathBuf>> {
        let mut stmt = self.conn.prepare("SELECT path FROM ValidPaths")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(PathBuf::from(basename_only(&row?)));
        }
        Ok(out)
    }

    /// Returns the direct references of `path` (base names), excluding the
    /// path itself.
    pub fn references(&self, store_dir: &Path, path: &StorePath) -> Result<Vec<PathBuf>> {
        let full_path = store_dir.join(path.base_name());
        let full_path = full_path.to_string_lossy().into_owned();

        let mut stmt = self.conn.prepare(
            "SELECT p2.path FROM Refs
             JOIN ValidPaths p1 ON p1.id = Refs.referrer
             JOIN ValidPaths p2 ON p2.id = Refs.reference
             WHERE p1.path = ?1",
        )?;
        let rows = stmt.query_map([&full_path], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            let row = row?;
            let base = basename_only(&row);
            if base != path.base_name().to_string_lossy() {
                out.push(PathBuf::from(base));
            }
        }
        Ok(out)
    }
}

fn basename_only(full_path: &str) -> &str {
    full_path.rsplit('/').next().unwrap_or(full_path)
}

impl From<rusqlite::Error> for crate::error::Error {
    fn from(e: rusqlite::Error) -> Self {
        crate::error::Error::MalformedManifest {
            reason: format!("store database error: {e}"),
        }
    }
}
