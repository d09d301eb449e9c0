//! Job lifecycle and persisted reports.
//!
//! Every disc insertion becomes one job that walks a fixed state machine.
//! Transitions are a pure function so the orchestrator cannot invent a
//! path the machine does not allow. Finished and failed jobs persist as
//! one JSON file each in the state directory.

use crate::titles::Classification;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// State of a rip job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// A disc was found in the drive.
    Detected,
    /// The disc resolved to a known movie identity.
    Identified,
    /// Titles classified and tracks chosen.
    TracksSelected,
    /// Ripping titles off the disc.
    Extracting,
    /// Encoding extracted titles.
    Transcoding,
    /// Writing track metadata into finished files.
    Tagging,
    /// Moving outputs into the library.
    Finalizing,
    /// Every requested title landed in the library.
    Done,
    /// The job stopped with an error.
    Failed,
    /// Scratch space removed; nothing left to do.
    CleanedUp,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Detected
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Detected => write!(f, "detected"),
            JobState::Identified => write!(f, "identified"),
            JobState::TracksSelected => write!(f, "tracks_selected"),
            JobState::Extracting => write!(f, "extracting"),
            JobState::Transcoding => write!(f, "transcoding"),
            JobState::Tagging => write!(f, "tagging"),
            JobState::Finalizing => write!(f, "finalizing"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
            JobState::CleanedUp => write!(f, "cleaned_up"),
        }
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::CleanedUp)
    }
}

/// Events that drive a job forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    IdentityResolved,
    TracksChosen,
    ExtractionStarted,
    ExtractionFinished,
    TranscodingFinished,
    TaggingFinished,
    FinalizationFinished,
    Errored,
    Cleaned,
}

/// A transition the machine does not allow.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid transition from {state} on {event:?}")]
pub struct InvalidTransition {
    pub state: JobState,
    pub event: JobEvent,
}

/// Advances the state machine by one event.
///
/// `Errored` is accepted from any non-terminal state; `Cleaned` only from
/// `Done` or `Failed`. Everything else follows the single forward path.
pub fn transition(state: JobState, event: JobEvent) -> Result<JobState, InvalidTransition> {
    use JobEvent::*;
    use JobState::*;

    let next = match (state, event) {
        (Detected, IdentityResolved) => Identified,
        (Identified, TracksChosen) => TracksSelected,
        (TracksSelected, ExtractionStarted) => Extracting,
        (Extracting, ExtractionFinished) => Transcoding,
        (Transcoding, TranscodingFinished) => Tagging,
        (Tagging, TaggingFinished) => Finalizing,
        (Finalizing, FinalizationFinished) => Done,
        (s, Errored) if !s.is_terminal() => Failed,
        (Done | Failed, Cleaned) => CleanedUp,
        (state, event) => return Err(InvalidTransition { state, event }),
    };
    Ok(next)
}

/// Outcome of one title within a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TitleReport {
    pub title_index: u32,
    pub classification: Classification,
    /// Library path for a title that made it all the way through.
    pub final_path: Option<PathBuf>,
    /// Error text for a title that did not.
    pub error: Option<String>,
}

/// The persisted record of one disc job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobReport {
    pub id: String,
    pub fingerprint: String,
    pub volume_label: String,
    /// Resolved movie title, when identification succeeded.
    pub movie_title: Option<String>,
    pub movie_year: Option<u16>,
    pub state: JobState,
    pub titles: Vec<TitleReport>,
    pub error: Option<String>,
    /// Unix timestamp in milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobReport {
    pub fn new(fingerprint: &str, volume_label: &str) -> Self {
        let now = current_timestamp_ms();
        JobReport {
            id: Uuid::new_v4().to_string(),
            fingerprint: fingerprint.to_string(),
            volume_label: volume_label.to_string(),
            movie_title: None,
            movie_year: None,
            state: JobState::Detected,
            titles: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an event, updating state and timestamp.
    pub fn apply(&mut self, event: JobEvent) -> Result<(), InvalidTransition> {
        self.state = transition(self.state, event)?;
        self.updated_at = current_timestamp_ms();
        Ok(())
    }

    /// Records a failure and moves to `Failed` if not already terminal.
    pub fn fail(&mut self, reason: &str) {
        self.error = Some(reason.to_string());
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
        }
        self.updated_at = current_timestamp_ms();
    }
}

fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Saves a report as `{job_id}.json` under `state_dir/jobs/`.
pub fn save_report(report: &JobReport, state_dir: &Path) -> Result<(), io::Error> {
    let dir = state_dir.join("jobs");
    fs::create_dir_all(&dir)?;

    let json = serde_json::to_string_pretty(report)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(dir.join(format!("{}.json", report.id)), json)
}

/// Loads every parseable report from the state directory. Corrupt files
/// are skipped with a warning.
pub fn load_reports(state_dir: &Path) -> Result<Vec<JobReport>, io::Error> {
    let dir = state_dir.join("jobs");
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(report) => reports.push(report),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable job report"),
        }
    }

    reports.sort_by_key(|r: &JobReport| r.created_at);
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const HAPPY_PATH: [JobEvent; 7] = [
        JobEvent::IdentityResolved,
        JobEvent::TracksChosen,
        JobEvent::ExtractionStarted,
        JobEvent::ExtractionFinished,
        JobEvent::TranscodingFinished,
        JobEvent::TaggingFinished,
        JobEvent::FinalizationFinished,
    ];

    fn all_states() -> [JobState; 10] {
        [
            JobState::Detected,
            JobState::Identified,
            JobState::TracksSelected,
            JobState::Extracting,
            JobState::Transcoding,
            JobState::Tagging,
            JobState::Finalizing,
            JobState::Done,
            JobState::Failed,
            JobState::CleanedUp,
        ]
    }

    fn state_strategy() -> impl Strategy<Value = JobState> {
        prop::sample::select(all_states().to_vec())
    }

    fn event_strategy() -> impl Strategy<Value = JobEvent> {
        prop::sample::select(vec![
            JobEvent::IdentityResolved,
            JobEvent::TracksChosen,
            JobEvent::ExtractionStarted,
            JobEvent::ExtractionFinished,
            JobEvent::TranscodingFinished,
            JobEvent::TaggingFinished,
            JobEvent::FinalizationFinished,
            JobEvent::Errored,
            JobEvent::Cleaned,
        ])
    }

    #[test]
    fn test_happy_path_ends_done() {
        let mut state = JobState::Detected;
        for event in HAPPY_PATH {
            state = transition(state, event).expect("forward path is legal");
        }
        assert_eq!(state, JobState::Done);
    }

    #[test]
    fn test_error_allowed_from_any_non_terminal() {
        for state in all_states() {
            let result = transition(state, JobEvent::Errored);
            if state.is_terminal() {
                assert!(result.is_err(), "{state} should not accept Errored");
            } else {
                assert_eq!(result, Ok(JobState::Failed));
            }
        }
    }

    #[test]
    fn test_cleanup_only_from_done_or_failed() {
        for state in all_states() {
            let result = transition(state, JobEvent::Cleaned);
            match state {
                JobState::Done | JobState::Failed => {
                    assert_eq!(result, Ok(JobState::CleanedUp));
                }
                _ => assert!(result.is_err(), "{state} should not accept Cleaned"),
            }
        }
    }

    #[test]
    fn test_no_skipping_ahead() {
        assert!(transition(JobState::Detected, JobEvent::TracksChosen).is_err());
        assert!(transition(JobState::Identified, JobEvent::ExtractionFinished).is_err());
        assert!(transition(JobState::Extracting, JobEvent::TaggingFinished).is_err());
    }

    #[test]
    fn test_report_fail_records_reason() {
        let mut report = JobReport::new("abc123", "MOVIE_DISC");
        report.apply(JobEvent::IdentityResolved).unwrap();
        report.fail("disc read error after 3 attempts");

        assert_eq!(report.state, JobState::Failed);
        assert_eq!(
            report.error.as_deref(),
            Some("disc read error after 3 attempts")
        );

        report.apply(JobEvent::Cleaned).unwrap();
        assert_eq!(report.state, JobState::CleanedUp);
    }

    #[test]
    fn test_save_and_load_reports() {
        let dir = TempDir::new().unwrap();

        let mut report = JobReport::new("abc123", "MOVIE_DISC");
        report.movie_title = Some("Dark City".to_string());
        report.movie_year = Some(1998);
        report.titles.push(TitleReport {
            title_index: 0,
            classification: Classification::MainFeature,
            final_path: Some(PathBuf::from(
                "/srv/media/movies/Dark City (1998)/Dark City (1998).mkv",
            )),
            error: None,
        });

        save_report(&report, dir.path()).unwrap();
        let loaded = load_reports(dir.path()).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], report);
    }

    #[test]
    fn test_load_skips_corrupt_reports() {
        let dir = TempDir::new().unwrap();
        let report = JobReport::new("abc123", "MOVIE_DISC");
        save_report(&report, dir.path()).unwrap();
        fs::write(dir.path().join("jobs/broken.json"), b"{ not json").unwrap();

        let loaded = load_reports(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, report.id);
    }

    #[test]
    fn test_load_reports_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(load_reports(&dir.path().join("nope")).unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Terminal states accept nothing except Done/Failed -> Cleaned.
        #[test]
        fn prop_terminal_states_are_sticky(
            state in state_strategy(),
            event in event_strategy(),
        ) {
            prop_assume!(state.is_terminal());
            let result = transition(state, event);
            match (state, event) {
                (JobState::Done | JobState::Failed, JobEvent::Cleaned) => {
                    prop_assert_eq!(result, Ok(JobState::CleanedUp));
                }
                _ => prop_assert!(result.is_err()),
            }
        }

        // Any legal transition either moves forward to a new state or
        // lands in Failed; it never returns to the same state.
        #[test]
        fn prop_transitions_never_self_loop(
            state in state_strategy(),
            event in event_strategy(),
        ) {
            if let Ok(next) = transition(state, event) {
                prop_assert_ne!(next, state);
            }
        }

        // Report JSON survives a round trip through disk.
        #[test]
        fn prop_report_persistence_round_trip(
            fingerprint in "[a-f0-9]{16}",
            label in "[A-Z0-9_]{1,24}",
            title in prop::option::of("[A-Za-z ]{1,30}"),
            year in prop::option::of(1920u16..2030),
        ) {
            let dir = TempDir::new().unwrap();
            let mut report = JobReport::new(&fingerprint, &label);
            report.movie_title = title;
            report.movie_year = year;

            save_report(&report, dir.path()).unwrap();
            let loaded = load_reports(dir.path()).unwrap();
            prop_assert_eq!(loaded.len(), 1);
            prop_assert_eq!(&loaded[0], &report);
        }
    }
}
