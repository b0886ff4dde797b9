//! On-disk lifecycle of staged artifacts.
//!
//! Each repository name owns exactly one directory under the staging root.
//! [`StagingDirectory::prepare`] wipes and recreates that directory and hands
//! back a [`StagingGuard`]; the guard removes the directory again unless the
//! ingestion explicitly commits it. Ingestors call
//! [`StagingGuard::discard`] on failure; dropping the guard uncommitted,
//! as during a panic, rolls back too.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::name::ArtifactName;

#[derive(Debug, Clone)]
pub struct StagingDirectory {
    root: PathBuf,
}

impl StagingDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location for a name: `<root>/<name>`.
    pub fn location(&self, name: &ArtifactName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Remove whatever exists at `path` (file or directory) and recreate it
    /// as an empty directory. Safe to call when nothing exists.
    pub fn reset(path: &Path) -> io::Result<()> {
        remove_existing(path)?;
        fs::create_dir_all(path)?;
        debug!(path = %path.display(), "Reset staging directory");
        Ok(())
    }

    /// Recursive removal; an already absent path is not an error.
    pub fn destroy(path: &Path) -> io::Result<()> {
        remove_existing(path)?;
        debug!(path = %path.display(), "Destroyed staging directory");
        Ok(())
    }

    /// Reset the location for `name` off the async executor and return a
    /// guard that rolls it back unless committed.
    pub async fn prepare(&self, name: &ArtifactName) -> io::Result<StagingGuard> {
        let path = self.location(name);
        let target = path.clone();
        let reset = tokio::task::spawn_blocking(move || {
            let result = StagingDirectory::reset(&target);
            if result.is_err() {
                // a failed reset may leave a partially removed tree behind
                let _ = StagingDirectory::destroy(&target);
            }
            result
        })
        .await
        .map_err(io::Error::other)?;

        match reset {
            Ok(()) => {
                info!(repo_name = %name, path = %path.display(), "Prepared staging directory");
                Ok(StagingGuard {
                    path,
                    armed: true,
                })
            }
            Err(e) => {
                error!(error = ?e, path = %path.display(), "Failed to reset staging directory");
                Err(e)
            }
        }
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Exclusive handle on a freshly reset staging directory.
#[derive(Debug)]
#[must_use = "dropping the guard removes the staged directory"]
pub struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl StagingGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory for downstream consumers.
    pub fn commit(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Roll back on the blocking pool instead of inside `Drop`.
    pub async fn discard(mut self) {
        self.armed = false;
        let path = std::mem::take(&mut self.path);
        let shown = path.display().to_string();
        match tokio::task::spawn_blocking(move || StagingDirectory::destroy(&path)).await {
            Ok(Ok(())) => info!(path = %shown, "Rolled back staging directory"),
            Ok(Err(e)) => error!(error = ?e, path = %shown, "Failed to roll back staging directory"),
            Err(e) => error!(error = ?e, path = %shown, "Rollback task failed"),
        }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(path = %self.path.display(), "Staging guard dropped before commit, rolling back");
        if let Err(e) = StagingDirectory::destroy(&self.path) {
            error!(error = ?e, path = %self.path.display(), "Failed to roll back staging directory");
        }
    }
}
