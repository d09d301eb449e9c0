//! Startup preflight checks.
//!
//! Verifies the external tools before the daemon accepts discs. The
//! extractor and transcoder are hard requirements; the tagger and ffmpeg
//! are degraded-mode optional (tags unwritten, commentary detection
//! limited to name hints), so their absence is only logged.

use autorip_config::ToolsConfig;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("extraction tool not available: {0}")]
    ExtractorUnavailable(String),

    #[error("transcode tool not available: {0}")]
    TranscoderUnavailable(String),
}

/// Probes a tool by running it with a version flag. Returns the first
/// output line when the tool responds at all.
///
/// Some of these tools exit non-zero on `--version`, so any output counts
/// as present; only a spawn failure means the tool is missing.
pub fn probe_tool(tool: &str, version_flag: &str) -> Result<String, String> {
    let output = Command::new(tool)
        .arg(version_flag)
        .output()
        .map_err(|e| format!("{} {} failed: {}", tool, version_flag, e))?;

    Ok(first_output_line(&output.stdout, &output.stderr))
}

fn first_output_line(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("(no version output)")
        .to_string()
}

/// Runs all tool checks.
///
/// Fails when the extractor or transcoder is missing; logs a warning for
/// a missing tagger or ffmpeg and lets the daemon start degraded.
pub fn run_startup_checks(tools: &ToolsConfig) -> Result<(), StartupError> {
    match probe_tool(&tools.extractor, "version") {
        Ok(version) => info!(tool = %tools.extractor, %version, "extractor available"),
        Err(e) => return Err(StartupError::ExtractorUnavailable(e)),
    }

    match probe_tool(&tools.transcoder, "--version") {
        Ok(version) => info!(tool = %tools.transcoder, %version, "transcoder available"),
        Err(e) => return Err(StartupError::TranscoderUnavailable(e)),
    }

    match probe_tool(&tools.tagger, "--version") {
        Ok(version) => info!(tool = %tools.tagger, %version, "tagger available"),
        Err(e) => warn!(error = %e, "tagger unavailable, track metadata will not be written"),
    }

    match probe_tool(&tools.ffmpeg, "-version") {
        Ok(version) => info!(tool = %tools.ffmpeg, %version, "audio analyzer available"),
        Err(e) => warn!(error = %e, "ffmpeg unavailable, commentary detection limited to track names"),
    }

    Ok(())
}
