//! Per-disc scratch workspaces.
//!
//! Each disc gets a working directory under the temp root, keyed by a
//! prefix of its fingerprint. Directory creation doubles as the job lock:
//! `create_dir` is atomic, so a second job for the same disc fails fast
//! instead of stomping on the first one's files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Error type for workspace management.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A workspace for this disc already exists.
    #[error("a job for this disc is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// An acquired scratch directory. Dropping releases the lock best-effort;
/// call [`Workspace::cleanup`] for a checked release.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    cleaned: bool,
}

impl Workspace {
    /// Claims the workspace for a disc fingerprint, failing if one exists.
    pub fn acquire(temp_root: &Path, fingerprint: &str) -> Result<Self, WorkspaceError> {
        let key = &fingerprint[..fingerprint.len().min(16)];
        let dir = temp_root.join(key);

        fs::create_dir_all(temp_root)?;
        match fs::create_dir(&dir) {
            Ok(()) => Ok(Workspace {
                dir,
                cleaned: false,
            }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(WorkspaceError::AlreadyRunning)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Subdirectory for transcoded outputs, created on demand.
    pub fn output_dir(&self) -> Result<PathBuf, io::Error> {
        let dir = self.dir.join("out");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Removes the scratch directory and everything in it, releasing the
    /// lock for the next job on this disc.
    pub fn cleanup(mut self) -> Result<(), WorkspaceError> {
        self.cleaned = true;
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.cleaned {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "failed to remove workspace");
            }
        }
    }
}
