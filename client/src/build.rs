//! Build Coordinator (component H): `build(derivs)`.
//!
//! Combines an external `plan()` function (treated as an opaque
//! collaborator per the spec's explicit Non-goal) with the Pull
//! Pipeline and the local `nix-store --realise` subprocess. Grounded on
//! the teacher's absence of an equivalent daemon-side planner — the
//! teacher never builds, only pushes/pulls — so this is built directly
//! from §4.H, in the idiom of `push.rs`/`pull/mod.rs`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nixcache_core::error::{Error, Result};
use nixcache_core::nix_store::process::RealiseOptions;
use nixcache_core::nix_store::StorePath;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::pull;

/// A derivation path plus the output names a build planner decided to
/// build locally versus fetch from cache.
pub struct Plan {
    /// Derivations that must be realised locally.
    pub to_build: Vec<StorePath>,
    /// Derivation -> output paths already present in some cache.
    pub to_fetch: HashMap<StorePath, Vec<StorePath>>,
}

/// Pluggable external planner: `plan(derivs) -> (to_build, to_fetch)`.
/// Out of scope for this crate per the spec's Non-goals; callers supply
/// their own implementation (e.g. shelling out to `nix-instantiate`).
#[async_trait::async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, derivs: &[StorePath]) -> Result<Plan>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuildOptions {
    pub stop_on_failure: bool,
    pub max_jobs: Option<u32>,
    /// Creates an indirect GC root per built/fetched output.
    pub add_gc_roots: bool,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<StorePath>,
    pub fetched: Vec<StorePath>,
    pub failed: Vec<StorePath>,
    pub blocked: Vec<StorePath>,
}

/// `build(derivs)`: combine `plan()` output with the Pull Pipeline and a
/// local realise invocation.
pub async fn build(
    engine: &Engine,
    planner: &dyn Planner,
    derivs: &[StorePath],
    opts: BuildOptions,
) -> Result<BuildReport> {
    let plan = planner.plan(derivs).await?;
    let mut report = BuildReport::default();

    if !plan.to_fetch.is_empty() {
        let fetch_paths: Vec<StorePath> = plan.to_fetch.values().flatten().cloned().collect();
        let fetch_report = pull::fetch(engine, &fetch_paths).await?;
        report.fetched = fetch_report.fetched;
    }

    if !plan.to_build.is_empty() {
        let realise_opts = RealiseOptions {
            keep_going: !opts.stop_on_failure,
            max_jobs: opts.max_jobs,
            no_gc_warning: true,
        };

        let outcome = engine.store.realise(&plan.to_build, &realise_opts).await?;
        if !outcome.succeeded {
            warn!(stderr = %outcome.stderr, "nix-store --realise reported failures");
            for drv in &plan.to_build {
                match classify_failure(engine, drv, &plan.to_build).await? {
                    FailureClass::Failed => report.failed.push(drv.clone()),
                    FailureClass::Blocked => report.blocked.push(drv.clone()),
                    FailureClass::Succeeded => report.built.push(drv.clone()),
                }
            }
        } else {
            report.built = plan.to_build.clone();
        }

        if !report.failed.is_empty() && opts.stop_on_failure {
            return Err(Error::NixBuildError {
                reason: format!("{} derivation(s) failed", report.failed.len()),
            });
        }
    }

    if opts.add_gc_roots {
        for path in report.built.iter().chain(report.fetched.iter()) {
            let link = gc_root_link(path);
            if let Err(e) = engine.store.add_root(&link, path).await {
                warn!(%path, error = %e, "failed to create GC root");
            }
        }
    }

    info!(
        built = report.built.len(),
        fetched = report.fetched.len(),
        failed = report.failed.len(),
        blocked = report.blocked.len(),
        "build complete"
    );

    Ok(report)
}

enum FailureClass {
    Succeeded,
    Failed,
    Blocked,
}

/// A derivation is *failed* if none of its outputs exist and all of its
/// input-derivations' outputs do exist; otherwise it was blocked
/// upstream (§4.H step 3).
async fn classify_failure(
    engine: &Engine,
    drv: &StorePath,
    all_derivs: &[StorePath],
) -> Result<FailureClass> {
    let output_exists = Path::new(&engine.store.get_full_path(drv)).exists();
    if output_exists {
        return Ok(FailureClass::Succeeded);
    }

    let inputs = engine.reference_cache.references(drv).await.unwrap_or_default();
    let inputs_built = inputs
        .iter()
        .filter(|i| all_derivs.contains(i))
        .all(|i| engine.store.get_full_path(i).exists());

    if inputs_built {
        Ok(FailureClass::Failed)
    } else {
        Ok(FailureClass::Blocked)
    }
}

fn gc_root_link(path: &StorePath) -> PathBuf {
    PathBuf::from(format!("./result-{}", path.name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gc_root_link_uses_output_name() {
        let path = StorePath::from_base_name(PathBuf::from(
            "ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5",
        ))
        .unwrap();
        assert_eq!(gc_root_link(&path), PathBuf::from("./result-ruby-2.7.5"));
    }
}
