//! Disc fingerprinting.
//!
//! A fingerprint is a SHA-256 over a canonical serialization of the disc's
//! title/track layout plus the raw volume label. It is deterministic for the
//! same physical disc content and independent of mount path, so two discs
//! with identical structure but different labels still differ.

use crate::scan::ScanError;
use crate::titles::{DiscKind, TitleCandidate};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Error type for the bounded-retry layout scan.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The layout could not be enumerated within the retry budget.
    #[error("disc unreadable after {attempts} attempts: {last_error}")]
    Unreadable { attempts: u32, last_error: String },

    /// A non-retryable scan failure.
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Canonical layout form fed to the hash. Field order is fixed by the
/// struct definition, so serialization is deterministic.
#[derive(Serialize)]
struct CanonicalLayout<'a> {
    disc_kind: DiscKind,
    volume_label: &'a str,
    title_count: usize,
    titles: Vec<CanonicalTitle>,
}

#[derive(Serialize)]
struct CanonicalTitle {
    index: u32,
    duration_secs: u64,
    audio_tracks: usize,
    subtitle_tracks: usize,
}

/// Computes the fingerprint for a scanned disc layout.
pub fn compute_fingerprint(volume_label: &str, kind: DiscKind, titles: &[TitleCandidate]) -> String {
    let mut canonical: Vec<CanonicalTitle> = titles
        .iter()
        .map(|t| CanonicalTitle {
            index: t.index,
            duration_secs: t.duration_secs,
            audio_tracks: t.audio_tracks.len(),
            subtitle_tracks: t.subtitle_tracks.len(),
        })
        .collect();
    canonical.sort_by_key(|t| t.index);

    let layout = CanonicalLayout {
        disc_kind: kind,
        volume_label,
        title_count: canonical.len(),
        titles: canonical,
    };

    // Struct serialization cannot fail for these types.
    let json = serde_json::to_string(&layout).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();

    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Runs a layout scan with bounded retries and doubling backoff.
///
/// Only disc read errors and timeouts are retried; parse failures and
/// tool errors surface immediately.
pub fn scan_with_retry<F>(
    mut scan: F,
    max_attempts: u32,
    backoff_base: Duration,
) -> Result<Vec<TitleCandidate>, FingerprintError>
where
    F: FnMut() -> Result<Vec<TitleCandidate>, ScanError>,
{
    let mut backoff = backoff_base;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match scan() {
            Ok(titles) => return Ok(titles),
            Err(ScanError::ReadError(msg)) => {
                warn!(attempt, max_attempts, error = %msg, "disc read error during scan");
                last_error = msg;
            }
            Err(ScanError::Process(e)) => {
                warn!(attempt, max_attempts, error = %e, "scan process failure");
                last_error = e.to_string();
            }
            Err(other) => return Err(other.into()),
        }

        if attempt < max_attempts {
            std::thread::sleep(backoff);
            backoff *= 2;
        }
    }

    Err(FingerprintError::Unreadable {
        attempts: max_attempts,
        last_error,
    })
}
