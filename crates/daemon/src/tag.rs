//! Container tag writing.
//!
//! After transcoding, each title gets per-track language codes and display
//! names (including a "(Commentary)" label) written in place. The edit is
//! idempotent: setting the same properties twice is a no-op for players.

use crate::proc::{run_with_timeout, ProcessError};
use crate::titles::{AudioTrack, ChannelLayout, SubtitleTrack};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

/// Error type for tag writing.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag tool failed: {0}")]
    ToolFailed(String),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Maps a language code onto the ISO 639-2/B form the tag tool expects.
/// Most codes pass through; a handful of languages use the B variant.
pub fn mkv_language_code(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "eng" | "en" => "eng",
        "swe" | "sv" => "swe",
        "nor" | "no" => "nor",
        "dan" | "da" => "dan",
        "fin" | "fi" => "fin",
        "deu" | "ger" | "de" => "ger",
        "fra" | "fre" | "fr" => "fre",
        "spa" | "es" => "spa",
        "ita" | "it" => "ita",
        "por" | "pt" => "por",
        "nld" | "dut" | "nl" => "dut",
        "pol" | "pl" => "pol",
        "rus" | "ru" => "rus",
        "jpn" | "ja" => "jpn",
        "kor" | "ko" => "kor",
        "zho" | "chi" | "zh" => "chi",
        other => return other.to_string(),
    }
    .to_string()
}

/// Display name for an audio track: language, layout, commentary marker.
fn audio_track_name(track: &AudioTrack) -> Option<String> {
    let mut parts = Vec::new();
    if !track.language_name.is_empty() && track.language_name != "Unknown" {
        parts.push(track.language_name.clone());
    }
    if track.channel_layout != ChannelLayout::Unknown {
        parts.push(track.channel_layout.to_string());
    }
    if track.is_commentary {
        parts.push("(Commentary)".to_string());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Builds the in-place tag command for a finished container.
///
/// Tracks are addressed by their 1-based position per stream type, which
/// matches the order selected tracks were written in. Returns `None` when
/// there is nothing to edit.
pub fn build_tag_command(
    tool: &str,
    file: &Path,
    audio_tracks: &[AudioTrack],
    subtitle_tracks: &[SubtitleTrack],
) -> Option<Command> {
    if audio_tracks.is_empty() && subtitle_tracks.is_empty() {
        return None;
    }

    let mut cmd = Command::new(tool);
    cmd.arg(file);

    for (position, track) in audio_tracks.iter().enumerate() {
        cmd.arg("--edit").arg(format!("track:a{}", position + 1));
        cmd.arg("--set")
            .arg(format!("language={}", mkv_language_code(&track.language)));
        if let Some(name) = audio_track_name(track) {
            cmd.arg("--set").arg(format!("name={}", name));
        }
    }

    for (position, track) in subtitle_tracks.iter().enumerate() {
        cmd.arg("--edit").arg(format!("track:s{}", position + 1));
        cmd.arg("--set")
            .arg(format!("language={}", mkv_language_code(&track.language)));
        if !track.language_name.is_empty() {
            cmd.arg("--set")
                .arg(format!("name={}", track.language_name));
        }
    }

    Some(cmd)
}

/// Applies track metadata to a finished file. A no-op when there is
/// nothing to set.
pub fn run_tagging(
    tool: &str,
    file: &Path,
    audio_tracks: &[AudioTrack],
    subtitle_tracks: &[SubtitleTrack],
    timeout: Duration,
) -> Result<(), TagError> {
    let Some(cmd) = build_tag_command(tool, file, audio_tracks, subtitle_tracks) else {
        return Ok(());
    };

    let output = run_with_timeout(cmd, timeout)?;
    if output.status.success() {
        Ok(())
    } else {
        Err(TagError::ToolFailed(format!(
            "exited with status {}: {}",
            output.status,
            output.stderr.trim()
        )))
    }
}
