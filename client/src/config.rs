//! Client configuration.
//!
//! Primary configuration is environment-variable driven (§6), matching the
//! original Python implementation's `os.environ.get(...)` usage exactly —
//! this is the source of truth for endpoint identity and credentials. An
//! optional `$XDG_CONFIG_HOME/nixcache/config.toml` layer, grounded on the
//! teacher's `client/src/config.rs`, supplies defaults for concurrency,
//! compression choice and sync ignore-patterns, used only where the
//! corresponding CLI flag was left unset.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use xdg::BaseDirectories;

/// Application prefix in XDG base directories: `$XDG_CONFIG_HOME/nixcache`.
const XDG_PREFIX: &str = "nixcache";

/// Environment-sourced settings. Re-read at process startup; re-auth
/// prompts update the in-process copy (and the environment itself) but
/// are never written back to disk.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub path_cache_dir: PathBuf,
    pub narinfo_cache_dir: PathBuf,
    pub show_paths_limit: usize,
    pub compression_type: String,
    pub send_nars: bool,
    pub no_batch: bool,
    pub log_level: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("NIX_REPO_HTTP").ok(),
            username: env::var("NIX_BINARY_CACHE_USERNAME").ok(),
            password: env::var("NIX_BINARY_CACHE_PASSWORD").ok(),
            path_cache_dir: env_path_or_home("NIX_PATH_CACHE", ".nix-path-cache"),
            narinfo_cache_dir: env_path_or_home("NIX_NARINFO_CACHE", ".nix-narinfo-cache"),
            show_paths_limit: env::var("SHOW_PATHS_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(25),
            compression_type: env::var("COMPRESSION_TYPE").unwrap_or_else(|_| "xz".to_string()),
            send_nars: env_flag("SEND_NARS"),
            no_batch: env_flag("NO_BATCH"),
            log_level: env::var("LOG_LEVEL").ok(),
        }
    }

    /// Records credentials obtained via an interactive prompt, so that the
    /// environment reflects the password for the remainder of the process
    /// (mirroring `pynix`'s `os.environ[...] = password` side effect).
    pub fn remember_credentials(&mut self, username: &str, password: &str) {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        env::set_var("NIX_BINARY_CACHE_USERNAME", username);
        env::set_var("NIX_BINARY_CACHE_PASSWORD", password);
    }
}

fn env_path_or_home(var: &str, default_name: &str) -> PathBuf {
    if let Some(v) = env::var_os(var) {
        return PathBuf::from(v);
    }
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(default_name)
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

/// Optional `$XDG_CONFIG_HOME/nixcache/config.toml` defaults layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileDefaults {
    #[serde(default)]
    pub max_jobs: Option<usize>,

    #[serde(default)]
    pub compression: Option<String>,

    /// Regexes whose matches are skipped by `sync`/`daemon` unless
    /// overridden by `--no-ignore`.
    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(default)]
    pub ignore_drvs: Option<bool>,

    #[serde(default)]
    pub ignore_tarballs: Option<bool>,
}

impl FileDefaults {
    /// Loads the optional defaults file, returning an empty set of
    /// defaults if it doesn't exist or `$XDG_CONFIG_HOME` isn't available.
    pub fn load() -> Result<Self> {
        let path = match config_path() {
            Ok(Some(path)) => path,
            _ => return Ok(Self::default()),
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&path).with_context(|| format!("reading {path:?}"))?;
        let data: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {path:?}"))?;
        Ok(data)
    }
}

fn config_path() -> Result<Option<PathBuf>> {
    let dirs = BaseDirectories::with_prefix(XDG_PREFIX)?;
    Ok(Some(dirs.place_config_file("config.toml")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_recognizes_truthy_values() {
        env::set_var("NIXCACHE_TEST_FLAG_A", "1");
        assert!(env_flag("NIXCACHE_TEST_FLAG_A"));
        env::remove_var("NIXCACHE_TEST_FLAG_A");
    }

    #[test]
    fn env_flag_defaults_to_false() {
        env::remove_var("NIXCACHE_TEST_FLAG_B");
        assert!(!env_flag("NIXCACHE_TEST_FLAG_B"));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let defaults = FileDefaults::default();
        assert!(defaults.ignore.is_empty());
        assert_eq!(defaults.max_jobs, None);
    }
}
