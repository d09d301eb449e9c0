//! Per-title transcode adapter.
//!
//! One invocation per title against a named preset chosen by disc kind.
//! Track selections are passed as 1-based positions within each stream
//! type, matching how the tool numbers tracks. Failures here are treated
//! as deterministic: no retries, the title is reported and siblings
//! continue.

use crate::proc::{run_with_cancellation, ProcessError};
use crate::titles::{DiscKind, TitleCandidate};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Codecs passed through unchanged on Blu-ray sources, with a fallback
/// encode for anything else.
const AUDIO_COPY_MASK: &str = "truehd,eac3,ac3,dts,dtshd";
const AUDIO_FALLBACK: &str = "ac3";

/// Error type for transcoding.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The tool exited with a non-zero status.
    #[error("transcode failed with exit code: {0}")]
    Failed(i32),

    /// The tool was killed by a signal.
    #[error("transcode process was terminated by signal")]
    Terminated,

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Parameters for one title's transcode.
#[derive(Debug, Clone)]
pub struct TranscodeParams {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub preset: String,
    pub disc_kind: DiscKind,
    /// 1-based positions of selected audio tracks in input order.
    pub audio_positions: Vec<u32>,
    /// 1-based positions of selected subtitle tracks in input order.
    pub subtitle_positions: Vec<u32>,
}

/// Computes the 1-based selected-track positions for a title.
///
/// The tool numbers tracks per stream type in input order, so position N
/// here is the Nth audio (or subtitle) track of the extracted file.
pub fn selected_track_positions(title: &TitleCandidate) -> (Vec<u32>, Vec<u32>) {
    let audio = title
        .audio_tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.selected)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    let subtitles = title
        .subtitle_tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.selected)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    (audio, subtitles)
}

/// Builds the transcode command for one title.
pub fn build_transcode_command(tool: &str, params: &TranscodeParams) -> Command {
    let mut cmd = Command::new(tool);

    cmd.arg("-i").arg(&params.input_path);
    cmd.arg("-o").arg(&params.output_path);
    cmd.arg("--preset").arg(&params.preset);
    cmd.arg("--format").arg("av_mkv");

    if params.audio_positions.is_empty() {
        // Never ship a silent file; fall back to the first track.
        cmd.arg("--audio").arg("1");
    } else {
        cmd.arg("--audio").arg(join_positions(&params.audio_positions));
    }

    if !params.subtitle_positions.is_empty() {
        cmd.arg("--subtitle")
            .arg(join_positions(&params.subtitle_positions));
    }

    if params.disc_kind == DiscKind::BluRay {
        cmd.arg("--audio-copy-mask").arg(AUDIO_COPY_MASK);
        cmd.arg("--audio-fallback").arg(AUDIO_FALLBACK);
    }

    cmd
}

fn join_positions(positions: &[u32]) -> String {
    positions
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Runs one title's transcode to completion. Kills the tool when `cancel`
/// is set so a shutdown request does not wait out a multi-hour encode.
///
/// A cancelled, timed-out, or failed run leaves a partial container
/// behind; that file is removed before the error surfaces.
pub fn run_transcode(
    tool: &str,
    params: &TranscodeParams,
    timeout: Duration,
    cancel: &AtomicBool,
) -> Result<(), TranscodeError> {
    let cmd = build_transcode_command(tool, params);
    let output = match run_with_cancellation(cmd, timeout, cancel) {
        Ok(output) => output,
        Err(e) => {
            discard_partial_output(&params.output_path);
            return Err(e.into());
        }
    };

    if output.status.success() {
        Ok(())
    } else {
        discard_partial_output(&params.output_path);
        match output.status.code() {
            Some(code) => Err(TranscodeError::Failed(code)),
            None => Err(TranscodeError::Terminated),
        }
    }
}

fn discard_partial_output(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::titles::{AudioTrack, SubtitleTrack};
    use proptest::prelude::*;
    use std::ffi::OsStr;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|a| a.to_str().map(String::from))
            .collect()
    }

    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn make_params(kind: DiscKind) -> TranscodeParams {
        TranscodeParams {
            input_path: PathBuf::from("/ws/Movie_t00.mkv"),
            output_path: PathBuf::from("/ws/out/Movie.mkv"),
            preset: "HQ 1080p30 Surround".to_string(),
            disc_kind: kind,
            audio_positions: vec![1, 3],
            subtitle_positions: vec![2],
        }
    }

    #[test]
    fn test_command_core_flags() {
        let params = make_params(DiscKind::Dvd);
        let cmd = build_transcode_command("HandBrakeCLI", &params);
        assert_eq!(cmd.get_program(), OsStr::new("HandBrakeCLI"));

        let args = args_of(&cmd);
        assert!(has_flag_with_value(&args, "-i", "/ws/Movie_t00.mkv"));
        assert!(has_flag_with_value(&args, "-o", "/ws/out/Movie.mkv"));
        assert!(has_flag_with_value(&args, "--preset", "HQ 1080p30 Surround"));
        assert!(has_flag_with_value(&args, "--format", "av_mkv"));
        assert!(has_flag_with_value(&args, "--audio", "1,3"));
        assert!(has_flag_with_value(&args, "--subtitle", "2"));
    }

    #[test]
    fn test_bluray_gets_passthrough_mask() {
        let args = args_of(&build_transcode_command("HandBrakeCLI", &make_params(DiscKind::BluRay)));
        assert!(has_flag_with_value(&args, "--audio-copy-mask", AUDIO_COPY_MASK));
        assert!(has_flag_with_value(&args, "--audio-fallback", AUDIO_FALLBACK));

        let dvd_args = args_of(&build_transcode_command("HandBrakeCLI", &make_params(DiscKind::Dvd)));
        assert!(!dvd_args.iter().any(|a| a == "--audio-copy-mask"));
    }

    #[test]
    fn test_empty_audio_selection_falls_back_to_first_track() {
        let mut params = make_params(DiscKind::Dvd);
        params.audio_positions.clear();
        params.subtitle_positions.clear();

        let args = args_of(&build_transcode_command("HandBrakeCLI", &params));
        assert!(has_flag_with_value(&args, "--audio", "1"));
        assert!(!args.iter().any(|a| a == "--subtitle"));
    }

    #[test]
    fn test_selected_track_positions_are_one_based() {
        let title = TitleCandidate {
            audio_tracks: vec![
                AudioTrack {
                    selected: false,
                    ..Default::default()
                },
                AudioTrack {
                    selected: true,
                    ..Default::default()
                },
                AudioTrack {
                    selected: true,
                    ..Default::default()
                },
            ],
            subtitle_tracks: vec![SubtitleTrack {
                selected: true,
                ..Default::default()
            }],
            ..Default::default()
        };

        let (audio, subs) = selected_track_positions(&title);
        assert_eq!(audio, vec![2, 3]);
        assert_eq!(subs, vec![1]);
    }

    #[test]
    fn test_failed_run_discards_partial_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut params = make_params(DiscKind::Dvd);
        params.output_path = dir.path().join("Movie.mkv");
        fs::write(&params.output_path, b"partial container").unwrap();

        let cancel = AtomicBool::new(false);
        let result = run_transcode("false", &params, Duration::from_secs(5), &cancel);
        assert!(matches!(result, Err(TranscodeError::Failed(_))));
        assert!(!params.output_path.exists());
    }

    #[test]
    fn test_spawn_failure_discards_partial_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut params = make_params(DiscKind::Dvd);
        params.output_path = dir.path().join("Movie.mkv");
        fs::write(&params.output_path, b"partial container").unwrap();

        let cancel = AtomicBool::new(false);
        let result = run_transcode(
            "/nonexistent/binary/for/sure",
            &params,
            Duration::from_secs(1),
            &cancel,
        );
        assert!(matches!(result, Err(TranscodeError::Process(_))));
        assert!(!params.output_path.exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Audio positions land in the command exactly as given, in order.
        #[test]
        fn prop_positions_preserved_in_command(
            positions in prop::collection::vec(1u32..30, 1..8),
        ) {
            let mut params = make_params(DiscKind::Dvd);
            params.audio_positions = positions.clone();

            let args = args_of(&build_transcode_command("HandBrakeCLI", &params));
            let expected = positions
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            prop_assert!(has_flag_with_value(&args, "--audio", &expected));
        }
    }
}
