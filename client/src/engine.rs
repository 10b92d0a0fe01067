//! Shared transfer-engine context: the session, local store handle and
//! caches every pipeline (`send`, `fetch`, `build`, `sync`) is built on.
//!
//! Grounded on the teacher's `ApiClient`-plus-`NixStore` pair threaded
//! through `client/src/push.rs` and `client/src/command/*`; this crate
//! bundles the same handles into one struct so each pipeline constructor
//! takes a single `&Engine` instead of repeating the same five arguments.

use std::path::PathBuf;
use std::sync::Arc;

use dialoguer::{Input, Password};
use nixcache_core::error::Result;
use nixcache_core::narinfo::Compression;
use nixcache_core::narinfo_cache::NarinfoCache;
use nixcache_core::nix_store::NixStore;
use nixcache_core::reference_cache::{ReferenceCache, SharedReferenceCache};
use nixcache_core::session::{CredentialProvider, Credentials, Session};
use nixcache_core::store_db::StoreDb;
use reqwest::Url;

use crate::cancellation::Cancellation;
use crate::config::EnvConfig;

#[derive(Clone)]
pub struct Engine {
    pub session: Arc<Session>,
    pub store: Arc<NixStore>,
    pub reference_cache: SharedReferenceCache,
    pub narinfo_cache: Arc<NarinfoCache>,
    pub cancellation: Cancellation,
    pub max_jobs: usize,
    pub show_paths_limit: usize,
    pub compression: Compression,
    pub send_nars: bool,
    pub no_batch: bool,
}

impl Engine {
    /// Builds the engine from environment configuration and CLI
    /// overrides, performing the session handshake against `endpoint`.
    pub async fn connect(env: &EnvConfig, max_jobs: Option<usize>) -> Result<Self> {
        let endpoint_str = env
            .endpoint
            .clone()
            .ok_or_else(|| nixcache_core::error::Error::CouldNotConnect {
                endpoint: "<unset>".to_string(),
                reason: "NIX_REPO_HTTP is not set".to_string(),
            })?;
        let endpoint = Url::parse(&endpoint_str).map_err(|e| {
            nixcache_core::error::Error::CouldNotConnect {
                endpoint: endpoint_str.clone(),
                reason: e.to_string(),
            }
        })?;

        let store = Arc::new(NixStore::connect());

        let credentials = match (&env.username, &env.password) {
            (Some(u), Some(p)) => Some(Credentials {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => None,
        };

        let client = reqwest::Client::new();
        let session = Arc::new(
            Session::connect(
                endpoint,
                client,
                store.store_dir().to_path_buf(),
                credentials,
                Some(10),
                Arc::new(InteractiveCredentialProvider),
                user_agent(),
            )
            .await?,
        );

        let db_path = default_db_path(store.store_dir());
        let db = StoreDb::open(&db_path).ok();
        let reference_cache: SharedReferenceCache = Arc::new(
            ReferenceCache::open(
                env.path_cache_dir.clone(),
                store.store_dir().to_path_buf(),
                db,
            )
            .await?,
        );

        let narinfo_cache = Arc::new(NarinfoCache::new(env.narinfo_cache_dir.clone()));

        let compression = Compression::parse(&env.compression_type)
            .unwrap_or(Compression::Xz);

        Ok(Self {
            session,
            store,
            reference_cache,
            narinfo_cache,
            cancellation: Cancellation::new(),
            max_jobs: max_jobs.unwrap_or_else(num_cpus),
            show_paths_limit: env.show_paths_limit,
            compression,
            send_nars: env.send_nars,
            no_batch: env.no_batch,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        default_db_path(self.store.store_dir())
    }
}

fn default_db_path(store_dir: &std::path::Path) -> PathBuf {
    // Conventionally `/nix/var/nix/db/db.sqlite` alongside `/nix/store`.
    store_dir
        .parent()
        .unwrap_or(store_dir)
        .join("var/nix/db/db.sqlite")
}

/// `nixcache/<crate version> (<distributor>)`, sent as `User-Agent` on
/// every request, mirroring the teacher's `ATTIC_USER_AGENT`.
fn user_agent() -> String {
    format!(
        "nixcache/{} ({})",
        env!("CARGO_PKG_VERSION"),
        crate::version::DISTRIBUTOR
    )
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Prompts on a TTY for credentials when the server returns 401;
/// otherwise answers `None`, matching the spec's non-interactive failure.
struct InteractiveCredentialProvider;

#[async_trait::async_trait]
impl CredentialProvider for InteractiveCredentialProvider {
    async fn prompt(&self, endpoint: &str) -> Option<Credentials> {
        if !atty_stdin() {
            return None;
        }

        let endpoint = endpoint.to_string();
        tokio::task::spawn_blocking(move || {
            let username = Input::new()
                .with_prompt(format!("Username for {endpoint}"))
                .interact_text()
                .ok()?;
            let password: String = Password::new()
                .with_prompt(format!("Password for {endpoint}"))
                .interact()
                .ok()?;

            // Mirrors `pynix._get_auth`'s `os.environ[...] = password` side
            // effect, so the rest of this process sees the prompted
            // credentials on its next `EnvConfig::from_env()` read.
            let mut env = EnvConfig::from_env();
            env.remember_credentials(&username, &password);

            Some(Credentials { username, password })
        })
        .await
        .ok()
        .flatten()
    }
}

fn atty_stdin() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}
