//! Commentary detection from audio dynamics.
//!
//! Commentary tracks are persistently compressed speech: their peak-to-mean
//! spread sits well below a mixed film soundtrack's. We sample a window of
//! each track with a volume-statistics filter and threshold the dynamic
//! range, ignoring whatever the disc authors named the track.

use crate::proc::{run_with_timeout, ProcessError};
use crate::titles::TitleCandidate;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for audio analysis.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Volume statistics for one sampled audio track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioAnalysis {
    pub mean_volume_db: f64,
    pub max_volume_db: f64,
}

impl AudioAnalysis {
    pub fn dynamic_range_db(&self) -> f64 {
        self.max_volume_db - self.mean_volume_db
    }

    /// Below the threshold means compressed speech, i.e. commentary.
    pub fn is_likely_commentary(&self, threshold_db: f64) -> bool {
        self.dynamic_range_db() < threshold_db
    }
}

/// Per-track analyzer seam; the orchestrator only sees this trait.
pub trait AudioAnalyzer: Send + Sync {
    /// Analyzes one stream of an extracted file. `Ok(None)` means the
    /// sample produced no usable statistics (silent window, tool hiccup);
    /// the track is then left as scanned.
    fn analyze(&self, path: &Path, stream_index: u32) -> Result<Option<AudioAnalysis>, AudioError>;
}

/// Real analyzer driving ffmpeg's volumedetect filter.
#[derive(Debug, Clone)]
pub struct FfmpegAnalyzer {
    pub ffmpeg: String,
    pub sample_secs: u64,
    pub sample_offset_secs: u64,
    pub timeout: Duration,
}

impl FfmpegAnalyzer {
    pub fn build_command(&self, input: &Path, stream_index: u32) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-ss").arg(self.sample_offset_secs.to_string());
        cmd.arg("-i").arg(input);
        cmd.arg("-map").arg(format!("0:{}", stream_index));
        cmd.arg("-t").arg(self.sample_secs.to_string());
        cmd.arg("-af").arg("volumedetect");
        cmd.arg("-f").arg("null");
        cmd.arg("-");
        cmd
    }
}

impl AudioAnalyzer for FfmpegAnalyzer {
    fn analyze(&self, path: &Path, stream_index: u32) -> Result<Option<AudioAnalysis>, AudioError> {
        let cmd = self.build_command(path, stream_index);
        let output = match run_with_timeout(cmd, self.timeout) {
            Ok(output) => output,
            Err(ProcessError::TimedOut(d)) => {
                warn!(stream_index, ?d, "audio analysis timed out");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        // volumedetect reports on stderr
        Ok(parse_volumedetect_output(&output.stderr))
    }
}

/// Parses mean/max volume lines from the filter's report.
pub fn parse_volumedetect_output(output: &str) -> Option<AudioAnalysis> {
    static MEAN_RE: OnceLock<Regex> = OnceLock::new();
    static MAX_RE: OnceLock<Regex> = OnceLock::new();
    let mean_re =
        MEAN_RE.get_or_init(|| Regex::new(r"mean_volume:\s*(-?[\d.]+)\s*dB").unwrap());
    let max_re = MAX_RE.get_or_init(|| Regex::new(r"max_volume:\s*(-?[\d.]+)\s*dB").unwrap());

    let mean_volume_db: f64 = mean_re.captures(output)?[1].parse().ok()?;
    let max_volume_db: f64 = max_re.captures(output)?[1].parse().ok()?;

    Some(AudioAnalysis {
        mean_volume_db,
        max_volume_db,
    })
}

/// Analyzes every audio track of an extracted title and upgrades commentary
/// flags. Name-derived flags are never cleared; analysis only adds.
pub fn classify_title_audio(
    title: &mut TitleCandidate,
    extracted_file: &PathBuf,
    analyzer: &dyn AudioAnalyzer,
    threshold_db: f64,
) -> Result<(), AudioError> {
    for track in title.audio_tracks.iter_mut() {
        let analysis = analyzer.analyze(extracted_file, track.stream_index)?;
        if let Some(analysis) = analysis {
            let range = analysis.dynamic_range_db();
            track.dynamic_range_db = Some(range);
            if !track.is_commentary && analysis.is_likely_commentary(threshold_db) {
                debug!(
                    stream = track.stream_index,
                    dynamic_range = range,
                    "flagging track as commentary"
                );
                track.is_commentary = true;
            }
        }
    }
    Ok(())
}
