//! Core data model and transfer-engine primitives for the binary-cache
//! client: store path types, the closure engine, the reference and
//! narinfo caches, the HTTP session, and the local store's subprocess and
//! database interfaces.
//!
//! Everything that relates to network pipeline scheduling (push/pull
//! worker pools, the build coordinator, the sync daemon) lives in the
//! `nixcache-client` binary crate; this crate only provides the pieces
//! that are reusable without a CLI.

#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod closure;
pub mod error;
pub mod export;
pub mod hash;
pub mod manifest;
pub mod mime;
pub mod narinfo;
pub mod narinfo_cache;
pub mod nix_store;
pub mod reference_cache;
pub mod session;
pub mod store_db;

pub use error::{Error, Result};
