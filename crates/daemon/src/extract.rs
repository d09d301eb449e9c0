//! Disc extraction adapter.
//!
//! Builds and runs the extraction tool's rip invocation, retrying bounded
//! times with doubling backoff when the output carries a disc read-error
//! signature. Extraction is strictly serial per drive; parallelism happens
//! later, in transcoding.

use crate::proc::{run_with_cancellation, ProcessError};
use crate::scan::contains_read_error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Non-zero exit without a read-error signature.
    #[error("extraction tool failed: {0}")]
    ToolFailed(String),

    /// Read errors persisted through every retry.
    #[error("disc read error after {attempts} attempts: {last_error}")]
    ReadError { attempts: u32, last_error: String },

    /// The tool exited cleanly but a requested title's file never appeared.
    #[error("no output file produced for title {title_index}")]
    MissingOutput { title_index: u32 },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Builds the rip command. The tool only takes a single title index or
/// `all`, so multi-title selections rip everything and the caller picks
/// out the files it asked for.
pub fn build_extract_command(
    tool: &str,
    disc_spec: &str,
    title_indexes: &[u32],
    output_dir: &Path,
) -> Command {
    let mut cmd = Command::new(tool);
    cmd.arg("mkv").arg(disc_spec);
    match title_indexes {
        [single] => {
            cmd.arg(single.to_string());
        }
        _ => {
            cmd.arg("all");
        }
    }
    cmd.arg(output_dir);
    cmd
}

/// Finds the ripped file for a title index. The tool names outputs
/// `<something>_tNN.mkv` with a zero-padded title index.
pub fn find_title_file(dir: &Path, title_index: u32) -> Result<Option<PathBuf>, io::Error> {
    let suffix = format!("_t{:02}.mkv", title_index);
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(&suffix))
                .unwrap_or(false)
        })
        .collect();
    matches.sort();
    Ok(matches.into_iter().next())
}

/// Removes leftover container files so a retry starts from a clean slate.
fn clear_output_files(dir: &Path) -> Result<(), io::Error> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("mkv") {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// Rips the selected titles into the workspace.
///
/// Returns the output file per requested title index. Read errors retry
/// up to `max_attempts` with doubling backoff; any other failure is final.
/// A set `cancel` flag kills the rip in flight; partial files stay in the
/// workspace, which the job removes on every terminal path.
pub fn run_extraction(
    tool: &str,
    disc_spec: &str,
    title_indexes: &[u32],
    output_dir: &Path,
    max_attempts: u32,
    backoff_base: Duration,
    timeout: Duration,
    cancel: &AtomicBool,
) -> Result<Vec<(u32, PathBuf)>, ExtractError> {
    let mut backoff = backoff_base;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            info!(attempt, max_attempts, "retrying extraction");
            std::thread::sleep(backoff);
            backoff *= 2;
        }
        clear_output_files(output_dir)?;

        let cmd = build_extract_command(tool, disc_spec, title_indexes, output_dir);
        let output = run_with_cancellation(cmd, timeout, cancel)?;
        let combined = output.combined();

        if let Some(line) = combined.lines().find(|l| contains_read_error(l)) {
            warn!(attempt, error = line.trim(), "read error during extraction");
            last_error = line.trim().to_string();
            continue;
        }

        if !output.status.success() {
            return Err(ExtractError::ToolFailed(format!(
                "rip command exited with status {}",
                output.status
            )));
        }

        let mut files = Vec::new();
        for index in title_indexes {
            match find_title_file(output_dir, *index)? {
                Some(path) => files.push((*index, path)),
                None => return Err(ExtractError::MissingOutput { title_index: *index }),
            }
        }
        return Ok(files);
    }

    Err(ExtractError::ReadError {
        attempts: max_attempts,
        last_error,
    })
}
