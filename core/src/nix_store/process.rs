//! Subprocess wrapper around the `nix-store` command-line binary.
//!
//! The local store daemon is never linked into this process; every
//! operation here shells out to `nix-store` using exactly the flags and
//! stdin/stdout contracts documented for this system (§6 of the design):
//!
//! - `nix-store --export PATH` → export bytes on stdout.
//! - `nix-store --import` → reads export bytes on stdin, one imported path
//!   per line on stdout.
//! - `nix-store --realise PATHS… [--keep-going] [--max-jobs N] [--no-gc-warning]`.
//! - `nix-store --add-root LINK --indirect --realise PATH`.
//! - `nix-store --delete PATH` (best-effort, errors ignored).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{to_base_name, StorePath};
use crate::error::{Error, Result};

/// Options for `nix-store --realise`.
#[derive(Debug, Clone, Default)]
pub struct RealiseOptions {
    pub keep_going: bool,
    pub max_jobs: Option<u32>,
    pub no_gc_warning: bool,
}

/// Outcome of a `--realise` invocation.
#[derive(Debug)]
pub struct RealiseOutcome {
    pub succeeded: bool,
    /// Output paths printed on stdout, one per line, in the order reported.
    pub outputs: Vec<PathBuf>,
    pub stderr: String,
}

/// A handle to the local Nix store, backed by the `nix-store` binary.
pub struct NixStore {
    /// Path to the store directory, e.g. `/nix/store`.
    store_dir: PathBuf,

    /// Path to the `nix-store` binary; usually just `"nix-store"`, resolved
    /// via `$PATH`, but overridable for testing.
    binary: PathBuf,
}

impl NixStore {
    /// Connects to the local store, using `NIX_STORE_DIR` if set, otherwise
    /// the conventional `/nix/store`.
    pub fn connect() -> Self {
        let store_dir = std::env::var_os("NIX_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/nix/store"));

        Self {
            store_dir,
            binary: PathBuf::from("nix-store"),
        }
    }

    /// Connects to a store at an explicit directory, using a specific
    /// `nix-store` binary. Used in tests.
    pub fn with_binary(store_dir: PathBuf, binary: PathBuf) -> Self {
        Self { store_dir, binary }
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Returns the base store path of a path, without following symlinks.
    pub fn parse_store_path<P: AsRef<Path>>(&self, path: P) -> Result<StorePath> {
        let base_name = to_base_name(&self.store_dir, path.as_ref())?;
        StorePath::from_base_name(base_name)
    }

    /// Returns the full path for a base store path.
    pub fn get_full_path(&self, store_path: &StorePath) -> PathBuf {
        self.store_dir.join(store_path.base_name())
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Runs `nix-store --export PATH`, returning the raw export bytes.
    pub async fn export(&self, path: &StorePath) -> Result<Vec<u8>> {
        let full_path = self.get_full_path(path);

        let output = self
            .command()
            .arg("--export")
            .arg(&full_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::NixImportFailed {
                reason: format!(
                    "nix-store --export {} failed: {}",
                    full_path.display(),
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        Ok(output.stdout)
    }

    /// Runs `nix-store --import`, feeding `export_bytes` on stdin.
    ///
    /// Returns the store path reported on the first line of stdout.
    pub async fn import(&self, export_bytes: &[u8]) -> Result<StorePath> {
        let mut child = self
            .command()
            .arg("--import")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let write_fut = async {
            stdin.write_all(export_bytes).await?;
            drop(stdin);
            Ok::<(), std::io::Error>(())
        };

        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut out_buf = String::new();
        let read_fut = stdout.read_to_string(&mut out_buf);

        let (write_result, read_result) = tokio::join!(write_fut, read_fut);
        write_result?;
        read_result?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::NixImportFailed {
                reason: "nix-store --import exited non-zero".to_string(),
            });
        }

        let first_line = out_buf
            .lines()
            .next()
            .ok_or_else(|| Error::NixImportFailed {
                reason: "nix-store --import produced no output".to_string(),
            })?;

        self.parse_store_path(first_line.trim())
    }

    /// Runs `nix-store --realise` over one or more store paths (typically
    /// derivations).
    pub async fn realise(
        &self,
        paths: &[StorePath],
        opts: &RealiseOptions,
    ) -> Result<RealiseOutcome> {
        let mut cmd = self.command();
        cmd.arg("--realise");
        for p in paths {
            cmd.arg(self.get_full_path(p));
        }
        if opts.keep_going {
            cmd.arg("--keep-going");
        }
        if let Some(jobs) = opts.max_jobs {
            cmd.arg("--max-jobs").arg(jobs.to_string());
        }
        if opts.no_gc_warning {
            cmd.arg("--no-gc-warning");
        }

        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let outputs = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(PathBuf::from)
            .collect();

        Ok(RealiseOutcome {
            succeeded: output.status.success(),
            outputs,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Creates an indirect GC root at `link` pointing at `path`, realising
    /// it in the process: `nix-store --add-root LINK --indirect --realise PATH`.
    pub async fn add_root(&self, link: &Path, path: &StorePath) -> Result<()> {
        let output = self
            .command()
            .arg("--add-root")
            .arg(link)
            .arg("--indirect")
            .arg("--realise")
            .arg(self.get_full_path(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::NixBuildError {
                reason: format!(
                    "nix-store --add-root failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }

        Ok(())
    }

    /// Best-effort `nix-store --delete PATH`; errors are swallowed, matching
    /// the documented subprocess contract.
    pub async fn delete(&self, path: &StorePath) {
        let _ = self
            .command()
            .arg("--delete")
            .arg(self.get_full_path(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_path_joins_store_dir_and_base_name() {
        let store = NixStore::with_binary(PathBuf::from("/nix/store"), PathBuf::from("nix-store"));
        let path = StorePath::from_base_name(PathBuf::from(
            "ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5",
        ))
        .unwrap();
        assert_eq!(
            store.get_full_path(&path),
            PathBuf::from("/nix/store/ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5")
        );
    }

    #[test]
    fn parse_store_path_strips_store_dir() {
        let store = NixStore::with_binary(PathBuf::from("/nix/store"), PathBuf::from("nix-store"));
        let parsed = store
            .parse_store_path("/nix/store/ia70ss13m22znbl8khrf2hq72qmh5drr-ruby-2.7.5")
            .unwrap();
        assert_eq!(parsed.name(), "ruby-2.7.5");
    }
}
