//! Optical drive detection and ejection.
//!
//! A mounted disc volume is recognized by its structure markers: a `BDMV`
//! directory means Blu-ray, `VIDEO_TS` means DVD. Eject goes through an
//! external command so the physical drive is freed even on headless hosts.

use crate::proc::{run_with_timeout, ProcessError};
use crate::titles::DiscKind;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

/// Error type for drive operations.
#[derive(Debug, Error)]
pub enum DriveError {
    /// Eject command failed or the tool could not run.
    #[error("eject failed: {0}")]
    EjectFailed(String),

    /// IO error enumerating volumes.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// A disc volume found under the mount root, before fingerprinting.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedDisc {
    pub volume_label: String,
    pub kind: DiscKind,
    pub mount_path: PathBuf,
}

/// Scans a mount root for a disc volume.
///
/// Returns the first volume carrying a disc structure marker, or `None`
/// when no disc is mounted. Unreadable entries are skipped.
pub fn detect_disc_in(volumes_root: &Path) -> Result<Option<DetectedDisc>, DriveError> {
    if !volumes_root.exists() {
        return Ok(None);
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(volumes_root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    for path in entries {
        let kind = if path.join("BDMV").is_dir() {
            Some(DiscKind::BluRay)
        } else if path.join("VIDEO_TS").is_dir() {
            Some(DiscKind::Dvd)
        } else {
            None
        };

        if let Some(kind) = kind {
            let volume_label = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(Some(DetectedDisc {
                volume_label,
                kind,
                mount_path: path,
            }));
        }
    }

    Ok(None)
}

/// Runs the configured eject command against a mount path.
pub fn eject_disc(eject_tool: &str, mount_path: &Path) -> Result<(), DriveError> {
    let mut cmd = Command::new(eject_tool);
    cmd.arg(mount_path);

    let output = run_with_timeout(cmd, Duration::from_secs(30))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(DriveError::EjectFailed(format!(
            "{} exited with status {}: {}",
            eject_tool,
            output.status,
            output.stderr.trim()
        )))
    }
}
