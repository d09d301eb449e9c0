//! Title classification and track selection.
//!
//! Pure functions over the scanned title list: given identity metadata and
//! user preferences they decide which title is the movie, which are extras,
//! and which audio/subtitle tracks each kept title carries. Deterministic
//! and idempotent, so the orchestrator can re-run them after the audio
//! classifier updates commentary flags.

use autorip_config::{TrackConfig, TuningConfig};
use crate::titles::{Classification, TitleCandidate};
use thiserror::Error;
use tracing::debug;

/// Error type for title selection.
#[derive(Debug, Error)]
pub enum SelectError {
    /// No candidate clears the main-feature duration floor.
    #[error("no title clears the main-feature duration threshold")]
    NoMainFeatureFound,
}

/// Classifies every title and returns the main feature's index.
///
/// A main-feature candidate must run at least the configured floor. When
/// the identity carries an expected runtime the closest candidate wins
/// (ties to the larger duration, then the lower index); otherwise the
/// longest wins. Remaining titles above the noise floor become extras,
/// the rest are ignored.
pub fn classify_titles(
    titles: &mut [TitleCandidate],
    expected_runtime_secs: Option<u64>,
    tuning: &TuningConfig,
) -> Result<u32, SelectError> {
    let main_index = pick_main_feature(titles, expected_runtime_secs, tuning)
        .ok_or(SelectError::NoMainFeatureFound)?;

    for title in titles.iter_mut() {
        title.classification = if title.index == main_index {
            Classification::MainFeature
        } else if title.duration_secs > tuning.extra_noise_floor_secs {
            Classification::Extra
        } else {
            Classification::Ignored
        };
        debug!(
            title = title.index,
            duration = title.duration_secs,
            classification = %title.classification,
            "classified title"
        );
    }

    Ok(main_index)
}

fn pick_main_feature(
    titles: &[TitleCandidate],
    expected_runtime_secs: Option<u64>,
    tuning: &TuningConfig,
) -> Option<u32> {
    let qualifying: Vec<&TitleCandidate> = titles
        .iter()
        .filter(|t| t.duration_secs >= tuning.main_feature_min_secs)
        .collect();

    match expected_runtime_secs {
        Some(expected) => qualifying
            .iter()
            .min_by_key(|t| {
                (
                    t.duration_secs.abs_diff(expected),
                    u64::MAX - t.duration_secs,
                    t.index,
                )
            })
            .map(|t| t.index),
        None => qualifying
            .iter()
            .min_by_key(|t| (u64::MAX - t.duration_secs, t.index))
            .map(|t| t.index),
    }
}

/// Selects audio tracks for one kept title.
///
/// Exactly one primary: the richest non-commentary track in the most
/// preferred language that has any (falling back to the best track of any
/// language). Commentary tracks ride along as secondaries unless the user
/// disabled them. Returns the primary's language, if one was chosen.
pub fn select_audio_tracks(
    title: &mut TitleCandidate,
    tracks: &TrackConfig,
) -> Option<String> {
    for track in title.audio_tracks.iter_mut() {
        track.selected = false;
    }

    let primary_index = pick_primary_audio(title, tracks);
    if let Some(idx) = primary_index {
        title.audio_tracks[idx].selected = true;
    }

    if tracks.include_commentary {
        for track in title.audio_tracks.iter_mut() {
            if track.is_commentary {
                track.selected = true;
            }
        }
    }

    primary_index.map(|idx| title.audio_tracks[idx].language.clone())
}

fn pick_primary_audio(title: &TitleCandidate, tracks: &TrackConfig) -> Option<usize> {
    let best_in = |lang: Option<&str>| -> Option<usize> {
        title
            .audio_tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_commentary)
            .filter(|(_, t)| lang.map_or(true, |l| t.language.eq_ignore_ascii_case(l)))
            .min_by_key(|(i, t)| (u32::MAX - t.quality_score(), *i))
            .map(|(i, _)| i)
    };

    for lang in &tracks.preferred_audio_languages {
        if let Some(idx) = best_in(Some(lang)) {
            return Some(idx);
        }
    }
    // No preferred language present: the title still needs a primary.
    best_in(None)
}

/// Selects subtitle tracks for one kept title.
///
/// Keeps tracks in the preferred-subtitle languages subject to the forced
/// and SDH toggles. Forced tracks in the primary audio language are always
/// kept: they carry plot-critical foreign dialogue.
pub fn select_subtitle_tracks(
    title: &mut TitleCandidate,
    tracks: &TrackConfig,
    primary_audio_language: Option<&str>,
) {
    for sub in title.subtitle_tracks.iter_mut() {
        let forced_in_primary = sub.is_forced
            && primary_audio_language
                .map_or(false, |l| sub.language.eq_ignore_ascii_case(l));

        let preferred = tracks
            .preferred_subtitle_languages
            .iter()
            .any(|l| sub.language.eq_ignore_ascii_case(l));

        sub.selected = forced_in_primary
            || (preferred
                && (!sub.is_forced || tracks.include_forced_subs)
                && (!sub.is_sdh || tracks.include_sdh_subs));
    }
}

/// Runs audio then subtitle selection for one title.
pub fn select_tracks(title: &mut TitleCandidate, tracks: &TrackConfig) {
    let primary_language = select_audio_tracks(title, tracks);
    select_subtitle_tracks(title, tracks, primary_language.as_deref());
}
