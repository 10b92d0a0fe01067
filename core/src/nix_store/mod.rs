//! Nix store path types and the subprocess-backed store interface.
//!
//! ## Subprocess, not FFI
//!
//! The local store daemon is treated as an opaque external collaborator: we
//! never link against `libnixstore`. Every operation goes through the
//! `nix-store` command-line binary's documented flags and stdin/stdout
//! contracts (`--export`, `--import`, `--realise`, `--add-root`, `--delete`,
//! `--query --references`). See [`process`] for the implementation.

pub mod process;

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{de, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;

pub use process::NixStore;

/// Length of the hash in a store path.
pub const STORE_PATH_HASH_LEN: usize = 32;

/// Regex that matches a store path hash, without anchors.
pub const STORE_PATH_HASH_REGEX_FRAGMENT: &str = "[0123456789abcdfghijklmnpqrsvwxyz]{32}";

lazy_static! {
    /// Regex for a valid store path hash.
    static ref STORE_PATH_HASH_REGEX: Regex = {
        Regex::new(&format!("^{}$", STORE_PATH_HASH_REGEX_FRAGMENT)).unwrap()
    };

    /// Regex for a valid store base name: hash, `-`, human-readable name.
    ///
    /// See the Nix implementation in `src/libstore/path.cc`.
    static ref STORE_BASE_NAME_REGEX: Regex = {
        Regex::new(r"^[0123456789abcdfghijklmnpqrsvwxyz]{32}-[A-Za-z0-9+\-._?=]+$").unwrap()
    };
}

/// A path in a Nix store.
///
/// This must be a direct child of the store. This path may or may not
/// actually exist. Comparison and hashing are by base name, matching the
/// spec's "opaque; compared by string equality" store path model.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct StorePath {
    /// Base name of the store path, e.g.
    /// `ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5`.
    base_name: PathBuf,
}

/// A fixed-length store path hash, e.g. `ia70ss13m22znbl8khrf2hq72qmh5drr`.
///
/// Must contain exactly 32 characters from Nix's base-32 alphabet
/// (`0123456789abcdfghijklmnpqrsvwxyz`; `e`, `o`, `u`, `t` are banned).
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize)]
pub struct StorePathHash(String);

/// Information on a valid store path, as reported by `nix-store --query`.
#[derive(Debug)]
pub struct ValidPathInfo {
    pub path: StorePath,
    pub nar_hash: Hash,
    pub nar_size: u64,
    /// Direct references, as base names (may include `path` itself).
    pub references: Vec<PathBuf>,
    pub sigs: Vec<String>,
    pub ca: Option<String>,
}

impl StorePath {
    /// Creates a StorePath with a base name.
    pub fn from_base_name(base_name: PathBuf) -> Result<Self> {
        let s = base_name
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::InvalidStorePathName {
                base_name: base_name.clone(),
                reason: "Name contains non-UTF-8 characters",
            })?;

        if !STORE_BASE_NAME_REGEX.is_match(s) {
            return Err(Error::InvalidStorePathName {
                base_name,
                reason: "Name is of invalid format",
            });
        }

        Ok(Self { base_name })
    }

    /// Creates a StorePath with a known valid base name.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the name is of a valid format (refer to
    /// the documentation for `STORE_BASE_NAME_REGEX`). Other operations
    /// assume it's valid.
    #[allow(unsafe_code)]
    pub unsafe fn from_base_name_unchecked(base_name: PathBuf) -> Self {
        Self { base_name }
    }

    /// Gets the hash portion of the store path.
    pub fn to_hash(&self) -> StorePathHash {
        let s = self.base_name.to_str().expect("already validated UTF-8");
        let hash = s[..STORE_PATH_HASH_LEN].to_string();
        StorePathHash::new_unchecked_infallible(hash)
    }

    /// Returns the human-readable name.
    pub fn name(&self) -> String {
        let s = self.base_name.to_str().expect("already validated UTF-8");
        s[STORE_PATH_HASH_LEN + 1..].to_string()
    }

    pub fn as_os_str(&self) -> &OsStr {
        self.base_name.as_os_str()
    }

    pub fn base_name(&self) -> &Path {
        &self.base_name
    }

    fn as_base_name_bytes(&self) -> &[u8] {
        self.base_name.as_os_str().as_bytes()
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base_name.display())
    }
}

impl StorePathHash {
    /// Creates a store path hash from a string.
    pub fn new(hash: String) -> Result<Self> {
        if hash.as_bytes().len() != STORE_PATH_HASH_LEN {
            return Err(Error::InvalidStorePathHash {
                hash,
                reason: "Hash is of invalid length",
            });
        }

        if !STORE_PATH_HASH_REGEX.is_match(&hash) {
            return Err(Error::InvalidStorePathHash {
                hash,
                reason: "Hash is of invalid format",
            });
        }

        Ok(Self(hash))
    }

    /// Creates a store path hash from a string that has already been
    /// validated (e.g. extracted from a validated `StorePath`).
    fn new_unchecked_infallible(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorePathHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for StorePathHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error as _;
        String::deserialize(deserializer)
            .and_then(|s| Self::new(s).map_err(|e| D::Error::custom(e.to_string())))
    }
}

/// Returns the base store name of a path relative to a store root.
pub(crate) fn to_base_name(store_dir: &Path, path: &Path) -> Result<PathBuf> {
    if let Ok(remaining) = path.strip_prefix(store_dir) {
        let first = remaining
            .iter()
            .next()
            .ok_or_else(|| Error::InvalidStorePath {
                path: path.to_owned(),
                reason: "Path is store directory itself",
            })?;

        if first.len() < STORE_PATH_HASH_LEN {
            Err(Error::InvalidStorePath {
                path: path.to_owned(),
                reason: "Path is too short",
            })
        } else {
            Ok(PathBuf::from(first))
        }
    } else {
        Err(Error::InvalidStorePath {
            path: path.to_owned(),
            reason: "Path is not in store directory",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_base_name() {
        let p = StorePath::from_base_name(PathBuf::from(
            "ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5",
        ))
        .unwrap();
        assert_eq!(p.to_hash().as_str(), "ia70ss13m22znbl8khrf2hq72qmh5drr");
        assert_eq!(p.name(), "ruby-2.7.5");
    }

    #[test]
    fn rejects_short_hash() {
        assert!(StorePath::from_base_name(PathBuf::from("short-name")).is_err());
    }

    #[test]
    fn rejects_banned_base32_chars() {
        // 'e' 'o' 'u' 't' are banned from Nix's base32 alphabet.
        assert!(StorePath::from_base_name(PathBuf::from(
            "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee-pkg"
        ))
        .is_err());
    }

    #[test]
    fn to_base_name_strips_store_dir() {
        let store_dir = Path::new("/nix/store");
        let full = Path::new("/nix/store/ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5/bin/ruby");
        let base = to_base_name(store_dir, full).unwrap();
        assert_eq!(base, PathBuf::from("ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5"));
    }
}
