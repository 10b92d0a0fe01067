//! Concrete `Planner` implementations (component H's external `plan()`
//! collaborator, per §4.H) for the two build-shaped CLI commands.
//!
//! The spec treats `plan()` itself as an opaque external function — out
//! of scope for the transfer engine (§1's Non-goals). The CLI still
//! needs *something* to turn attribute names or derivation paths into
//! the `(to_build, to_fetch)` split the Build Coordinator consumes, so
//! this module provides the thin glue: shelling out to `nix-instantiate`
//! to resolve attrs to `.drv` paths (grounded on the teacher's own
//! `cli_eval` helper in `attic/src/nix_store/tests/mod.rs`, which drives
//! `nix-instantiate` the same way), then asking the Presence Oracle
//! which of each derivation's outputs are already cached remotely.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use nixcache_core::error::{Error, Result};
use nixcache_core::nix_store::StorePath;
use tokio::process::Command;

use crate::build::{Plan, Planner};
use crate::engine::Engine;
use crate::presence::{ObjectsOnServer, PresenceOracle};

/// Resolves `-P DIR ATTRS…` to derivation paths via `nix-instantiate -A
/// attr dir`. The attribute list is fixed at construction time; `plan()`
/// ignores its `derivs` argument, since attrs aren't derivation paths
/// until after instantiation (the Build Coordinator's `build(derivs)`
/// signature assumes derivations are already known, which doesn't hold
/// in this CLI mode).
pub struct NixInstantiatePlanner<'a> {
    engine: &'a Engine,
    dir: PathBuf,
    attrs: Vec<String>,
}

impl<'a> NixInstantiatePlanner<'a> {
    pub fn new(engine: &'a Engine, dir: PathBuf, attrs: Vec<String>) -> Self {
        Self { engine, dir, attrs }
    }

    async fn instantiate(&self, attr: &str) -> Result<StorePath> {
        let output = Command::new("nix-instantiate")
            .arg("-A")
            .arg(attr)
            .arg(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::NixBuildError {
                reason: format!(
                    "nix-instantiate -A {attr} {} failed: {}",
                    self.dir.display(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        let first_line = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::NixBuildError {
                reason: format!("nix-instantiate -A {attr} produced no output"),
            })?;

        self.engine.store.parse_store_path(first_line.trim())
    }
}

#[async_trait::async_trait]
impl<'a> Planner for NixInstantiatePlanner<'a> {
    async fn plan(&self, _derivs: &[StorePath]) -> Result<Plan> {
        let mut derivs = Vec::with_capacity(self.attrs.len());
        for attr in &self.attrs {
            derivs.push(self.instantiate(attr).await?);
        }
        split_by_presence(self.engine, derivs).await
    }
}

/// Treats its input directly as derivation paths (`build-derivations`).
pub struct DerivationListPlanner<'a> {
    engine: &'a Engine,
}

impl<'a> DerivationListPlanner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl<'a> Planner for DerivationListPlanner<'a> {
    async fn plan(&self, derivs: &[StorePath]) -> Result<Plan> {
        split_by_presence(self.engine, derivs.to_vec()).await
    }
}

/// Queries each derivation's outputs via `nix-store --query --outputs`,
/// then asks the Presence Oracle which outputs are already cached; a
/// derivation with every output present is fully delegated to
/// `to_fetch`, otherwise it's built locally.
async fn split_by_presence(engine: &Engine, derivs: Vec<StorePath>) -> Result<Plan> {
    let mut to_build = Vec::new();
    let mut to_fetch: HashMap<StorePath, Vec<StorePath>> = HashMap::new();

    let mut all_outputs: HashMap<StorePath, Vec<StorePath>> = HashMap::new();
    let mut flat_outputs = Vec::new();
    for drv in &derivs {
        let outputs = query_outputs(engine, drv).await?;
        flat_outputs.extend(outputs.iter().cloned());
        all_outputs.insert(drv.clone(), outputs);
    }

    let oracle = PresenceOracle::new(engine.session.clone(), engine.store.clone(), engine.max_jobs);
    let known = ObjectsOnServer::new();
    let presence = oracle.query(&flat_outputs, &known).await?;

    for drv in derivs {
        let outputs = all_outputs.remove(&drv).unwrap_or_default();
        let all_present = !outputs.is_empty()
            && outputs.iter().all(|o| presence.get(o).copied().unwrap_or(false));

        if all_present {
            to_fetch.insert(drv, outputs);
        } else {
            to_build.push(drv);
        }
    }

    Ok(Plan { to_build, to_fetch })
}

/// `nix-store --query --outputs DRV`, one output path per line.
async fn query_outputs(engine: &Engine, drv: &StorePath) -> Result<Vec<StorePath>> {
    let full_path = engine.store.get_full_path(drv);

    let output = Command::new("nix-store")
        .arg("--query")
        .arg("--outputs")
        .arg(&full_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::NixBuildError {
            reason: format!(
                "nix-store --query --outputs {} failed: {}",
                full_path.display(),
                String::from_utf8_lossy(&output.stderr)
            ),
        });
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|l| engine.store.parse_store_path(l.trim()))
        .collect()
}
