//! Narinfo metadata records.
//!
//! See `server/src/narinfo/mod.rs` in the teacher for a description of the
//! on-wire `.narinfo` format this parses; we only ever read these
//! documents, never produce them.

use std::path::PathBuf;

use displaydoc::Display;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::manifest::{split_space_delimited, ManifestDocument};

/// Compression codec named in a narinfo or accepted by `COMPRESSION_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Compression {
    /// none
    None,
    /// xz
    Xz,
    /// bzip2
    Bzip2,
    /// br
    Brotli,
    /// gzip
    Gzip,
    /// zstd
    Zstd,
}

impl Compression {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "xz" => Ok(Self::Xz),
            "bzip2" => Ok(Self::Bzip2),
            "br" => Ok(Self::Brotli),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::MalformedManifest {
                reason: format!("unknown compression {other:?}"),
            }),
        }
    }

    /// HTTP `Content-Encoding`-style value used when talking to the cache
    /// server.
    pub fn http_value(self) -> &'static str {
        match self {
            Self::None => "identity",
            Self::Xz => "xz",
            Self::Bzip2 => "bzip2",
            Self::Brotli => "br",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }
}

/// A parsed `.narinfo` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narinfo {
    /// Full store path, including the store directory.
    pub store_path: PathBuf,

    /// URL to fetch the archive, relative to the cache endpoint (or
    /// absolute).
    pub url: String,

    pub compression: Compression,

    pub file_hash: Option<Hash>,
    pub file_size: Option<u64>,

    pub nar_hash: Hash,
    pub nar_size: u64,

    /// Direct references, as base names (not full paths).
    pub references: Vec<String>,

    pub deriver: Option<String>,

    pub signatures: Vec<String>,

    /// System tuple, e.g. `x86_64-linux`. Present in real narinfo
    /// documents but not load-bearing for the transfer engine.
    pub system: Option<String>,
}

impl Narinfo {
    pub fn parse(text: &str) -> Result<Self> {
        let doc = ManifestDocument::parse(text)?;

        let store_path = PathBuf::from(doc.require("StorePath")?);
        let url = doc.require("URL")?.to_string();
        let compression = Compression::parse(doc.require("Compression")?)?;

        let file_hash = doc.get("FileHash").map(Hash::from_typed).transpose()?;
        let file_size = doc
            .get("FileSize")
            .map(|s| parse_u64(s, "FileSize"))
            .transpose()?;

        let nar_hash = Hash::from_typed(doc.require("NarHash")?)?;
        let nar_size = parse_u64(doc.require("NarSize")?, "NarSize")?;

        let references = doc
            .get("References")
            .map(split_space_delimited)
            .unwrap_or_default();

        let deriver = doc.get("Deriver").map(|s| s.to_string());
        let signatures = doc.get_all("Sig").map(|s| s.to_string()).collect();
        let system = doc.get("System").map(|s| s.to_string());

        Ok(Self {
            store_path,
            url,
            compression,
            file_hash,
            file_size,
            nar_hash,
            nar_size,
            references,
            deriver,
            signatures,
            system,
        })
    }

    /// Base name of `store_path`.
    pub fn base_name(&self) -> &str {
        self.store_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }
}

fn parse_u64(s: &str, field: &'static str) -> Result<u64> {
    s.parse().map_err(|_| Error::MalformedManifest {
        reason: format!("field {field} is not a valid integer: {s:?}"),
    })
}

/// The small `/nix-cache-info` document: just enough to validate the
/// server's store directory during the session handshake.
#[derive(Debug, Clone)]
pub struct CacheInfo {
    pub store_dir: PathBuf,
    pub want_mass_query: bool,
    pub priority: Option<i64>,
}

impl CacheInfo {
    pub fn parse(text: &str) -> Result<Self> {
        let doc = ManifestDocument::parse(text)?;
        let store_dir = PathBuf::from(doc.require("StoreDir")?);
        let want_mass_query = doc.get("WantMassQuery").map(|s| s == "1").unwrap_or(false);
        let priority = doc
            .get("Priority")
            .map(|s| parse_i64(s, "Priority"))
            .transpose()?;

        Ok(Self {
            store_dir,
            want_mass_query,
            priority,
        })
    }
}

fn parse_i64(s: &str, field: &'static str) -> Result<i64> {
    s.parse().map_err(|_| Error::MalformedManifest {
        reason: format!("field {field} is not a valid integer: {s:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "StorePath: /nix/store/p4pclmv1gyja5kzc26npqpia1qqxrf0l-ruby-2.7.3\n\
URL: nar/1w1fff338fvdw53sqgamddn1b2xgds473pv6y13gizdbqjv4i5p3.nar.xz\n\
Compression: xz\n\
FileHash: sha256:1w1fff338fvdw53sqgamddn1b2xgds473pv6y13gizdbqjv4i5p3\n\
FileSize: 4029176\n\
NarHash: sha256:1impfw8zdgisxkghq9a3q7cn7jb9zyzgxdydiamp8z2nlyyl0h5h\n\
NarSize: 18735072\n\
References: 0d71ygfwbmy1xjlbj1v027dfmy9cqavy-libffi-3.3 p4pclmv1gyja5kzc26npqpia1qqxrf0l-ruby-2.7.3\n\
Deriver: bidkcs01mww363s4s7akdhbl6ws66b0z-ruby-2.7.3.drv\n\
Sig: cache.nixos.org-1:abc==\n";

    #[test]
    fn parses_sample_narinfo() {
        let info = Narinfo::parse(SAMPLE).unwrap();
        assert_eq!(info.base_name(), "p4pclmv1gyja5kzc26npqpia1qqxrf0l-ruby-2.7.3");
        assert_eq!(info.compression, Compression::Xz);
        assert_eq!(info.nar_size, 18735072);
        assert_eq!(info.references.len(), 2);
        assert_eq!(info.signatures, vec!["cache.nixos.org-1:abc=="]);
        assert_eq!(
            info.deriver.as_deref(),
            Some("bidkcs01mww363s4s7akdhbl6ws66b0z-ruby-2.7.3.drv")
        );
    }

    #[test]
    fn rejects_missing_required_field() {
        let text = "URL: foo\nCompression: xz\n";
        assert!(Narinfo::parse(text).is_err());
    }

    #[test]
    fn parses_cache_info() {
        let info = CacheInfo::parse("StoreDir: /nix/store\nWantMassQuery: 1\n").unwrap();
        assert_eq!(info.store_dir, PathBuf::from("/nix/store"));
        assert!(info.want_mass_query);
    }
}
