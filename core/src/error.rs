//! Error handling.
//!
//! The variants mirror the taxonomy the transfer engine is specified
//! against: they describe *kinds* of failure the caller needs to branch on
//! (retry, fall back, abort), not implementation details.

use std::io;
use std::path::PathBuf;

use displaydoc::Display;

pub type Result<T> = std::result::Result<T, Error>;

/// An error from the transfer engine core.
#[derive(Debug, Display)]
pub enum Error {
    /// Invalid store path {path:?}: {reason}
    InvalidStorePath { path: PathBuf, reason: &'static str },

    /// Invalid store path base name {base_name:?}: {reason}
    InvalidStorePathName {
        base_name: PathBuf,
        reason: &'static str,
    },

    /// Invalid store path hash "{hash}": {reason}
    InvalidStorePathHash { hash: String, reason: &'static str },

    /// Could not connect to {endpoint}: {reason}
    CouldNotConnect { endpoint: String, reason: String },

    /// Server's store directory "{server_store_dir}" does not match local store directory "{local_store_dir}"
    StoreDirMismatch {
        server_store_dir: String,
        local_store_dir: String,
    },

    /// No such object: {path}
    NoSuchObject { path: String },

    /// Operation not supported by server: {route}
    OperationNotSupported { route: &'static str },

    /// Object not built after import: {path}
    ObjectNotBuilt { path: String },

    /// `nix-store --import` failed: {reason}
    NixImportFailed { reason: String },

    /// `nix-store --realise` failed: {reason}
    NixBuildError { reason: String },

    /// Transport error after {attempts} attempt(s): {reason}
    TransportExhausted { attempts: u32, reason: String },

    /// Operation cancelled.
    Cancelled,

    /// Malformed narinfo or manifest document: {reason}
    MalformedManifest { reason: String },

    /// Hashing error: {0}
    HashError(super::hash::Error),

    /// I/O error: {error}.
    IoError { error: io::Error },
}

impl Error {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidStorePath { .. } => "InvalidStorePath",
            Self::InvalidStorePathName { .. } => "InvalidStorePathName",
            Self::InvalidStorePathHash { .. } => "InvalidStorePathHash",
            Self::CouldNotConnect { .. } => "CouldNotConnect",
            Self::StoreDirMismatch { .. } => "StoreDirMismatch",
            Self::NoSuchObject { .. } => "NoSuchObject",
            Self::OperationNotSupported { .. } => "OperationNotSupported",
            Self::ObjectNotBuilt { .. } => "ObjectNotBuilt",
            Self::NixImportFailed { .. } => "NixImportFailed",
            Self::NixBuildError { .. } => "NixBuildError",
            Self::TransportExhausted { .. } => "TransportExhausted",
            Self::Cancelled => "Cancelled",
            Self::MalformedManifest { .. } => "MalformedManifest",
            Self::HashError(_) => "HashError",
            Self::IoError { .. } => "IoError",
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::IoError { error }
    }
}

impl From<super::hash::Error> for Error {
    fn from(error: super::hash::Error) -> Self {
        Self::HashError(error)
    }
}
