//! Identity resolution.
//!
//! Resolves a disc fingerprint to canonical title metadata through an
//! ordered fallback chain: cached result, community lookup by fingerprint,
//! metadata search by normalized volume label scored with textual
//! similarity and a runtime window, and finally manual input. Confidence
//! is ordinal in the source, never a stored numeric score.

use autorip_config::TuningConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Where an identity came from, in decreasing confidence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    CommunityDb,
    MetadataService,
    Manual,
}

impl std::fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentitySource::CommunityDb => write!(f, "community_db"),
            IdentitySource::MetadataService => write!(f, "metadata_service"),
            IdentitySource::Manual => write!(f, "manual"),
        }
    }
}

/// Canonical identity of a disc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityResult {
    pub title: String,
    pub year: Option<u16>,
    /// External catalog id (e.g. "tt0358273").
    pub external_id: Option<String>,
    /// Expected feature runtime, used by the selector when known.
    pub runtime_secs: Option<u64>,
    pub source: IdentitySource,
}

/// A ranked candidate from the metadata search service.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub title: String,
    pub year: Option<u16>,
    pub external_id: Option<String>,
    pub runtime_secs: Option<u64>,
}

/// Error type for identity resolution.
#[derive(Debug, Error)]
pub enum IdentifyError {
    /// Every stage of the chain failed and no manual input was available.
    #[error("disc identity could not be resolved")]
    Unresolved,

    /// IO error reading or writing the identity cache.
    #[error("identity cache error: {0}")]
    Cache(#[from] io::Error),
}

/// Transient failure from a lookup collaborator. The chain logs these and
/// falls through rather than aborting.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LookupError(pub String);

/// Community lookup service: exact match by fingerprint.
pub trait CommunityLookup: Send + Sync {
    fn lookup(&self, fingerprint: &str) -> Result<Option<IdentityResult>, LookupError>;
}

/// Public metadata search service, also the cover-art source.
pub trait MetadataSearch: Send + Sync {
    fn search(
        &self,
        query: &str,
        year_hint: Option<u16>,
    ) -> Result<Vec<SearchCandidate>, LookupError>;

    /// Fetches cover art bytes by external id, if the service has any.
    fn fetch_cover_art(&self, external_id: &str) -> Result<Option<Vec<u8>>, LookupError>;
}

/// Interactive disambiguation. Absent in unattended runs.
pub trait ManualResolver: Send + Sync {
    /// Returns `None` when the operator declines to identify the disc.
    fn resolve(&self, volume_label: &str) -> Result<Option<IdentityResult>, LookupError>;
}

/// Strips release tokens from a volume label and collapses separators into
/// a searchable title guess.
pub fn normalize_volume_label(label: &str) -> String {
    const STRIP_TOKENS: [&str; 12] = [
        "blu ray", "bluray", "dvd", "1080p", "2160p", "720p", "4k", "uhd",
        "extended", "remastered", "special edition", "collectors edition",
    ];

    let mut text = label.replace(['_', '-', '.'], " ").to_lowercase();
    for token in STRIP_TOKENS {
        text = text.replace(token, " ");
    }

    // "disc 1", "disc 2" suffixes
    let mut words: Vec<&str> = text.split_whitespace().collect();
    while words.len() >= 2 {
        let n = words.len();
        if words[n - 2] == "disc" && words[n - 1].chars().all(|c| c.is_ascii_digit()) {
            words.truncate(n - 2);
        } else {
            break;
        }
    }

    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classic dynamic-programming edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];

    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Normalized textual similarity in [0, 1].
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Picks the best search candidate, or `None` when the match is ambiguous.
///
/// Candidates with a known runtime outside the tolerance window around the
/// disc's longest title are dropped first. The winner must clear the
/// minimum similarity and lead the runner-up by the configured margin.
pub fn choose_best_match(
    candidates: &[SearchCandidate],
    normalized_label: &str,
    disc_runtime_secs: Option<u64>,
    tuning: &TuningConfig,
) -> Option<SearchCandidate> {
    let eligible: Vec<&SearchCandidate> = candidates
        .iter()
        .filter(|c| match (c.runtime_secs, disc_runtime_secs) {
            (Some(cand), Some(disc)) => {
                cand.abs_diff(disc) <= tuning.runtime_tolerance_secs
            }
            _ => true,
        })
        .collect();

    let mut scored: Vec<(f64, &SearchCandidate)> = eligible
        .iter()
        .map(|c| (similarity(&c.title, normalized_label), *c))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let (best_score, best) = scored.first()?;
    if *best_score < tuning.min_similarity {
        return None;
    }
    if let Some((runner_up_score, _)) = scored.get(1) {
        if best_score - runner_up_score < tuning.similarity_margin {
            return None;
        }
    }

    Some((*best).clone())
}

/// Fingerprint-keyed identity cache, one JSON file per disc under the
/// state directory. Repeat rips of a known disc skip network resolution.
#[derive(Debug, Clone)]
pub struct IdentityCache {
    dir: PathBuf,
}

impl IdentityCache {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("identities"),
        }
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }

    /// Loads a cached identity. A corrupt entry is treated as a miss.
    pub fn load(&self, fingerprint: &str) -> Option<IdentityResult> {
        let content = fs::read_to_string(self.entry_path(fingerprint)).ok()?;
        match serde_json::from_str(&content) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(fingerprint, error = %e, "discarding corrupt identity cache entry");
                None
            }
        }
    }

    pub fn store(&self, fingerprint: &str, identity: &IdentityResult) -> Result<(), io::Error> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(identity)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.entry_path(fingerprint), json)
    }
}

/// One bounded retry for a transient lookup failure before the chain falls
/// through to the next stage.
fn retry_once<T>(
    what: &str,
    mut call: impl FnMut() -> Result<T, LookupError>,
) -> Result<T, LookupError> {
    match call() {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(error = %e, "{} failed, retrying once", what);
            call()
        }
    }
}

/// Runs the resolution chain for one disc.
pub fn resolve_identity(
    cache: &IdentityCache,
    community: &dyn CommunityLookup,
    search: &dyn MetadataSearch,
    manual: Option<&dyn ManualResolver>,
    fingerprint: &str,
    volume_label: &str,
    longest_title_secs: Option<u64>,
    tuning: &TuningConfig,
) -> Result<IdentityResult, IdentifyError> {
    if let Some(identity) = cache.load(fingerprint) {
        info!(fingerprint, title = %identity.title, "identity cache hit");
        return Ok(identity);
    }

    match retry_once("community lookup", || community.lookup(fingerprint)) {
        Ok(Some(identity)) => {
            info!(title = %identity.title, "identified via community lookup");
            cache.store(fingerprint, &identity)?;
            return Ok(identity);
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "community lookup unavailable, falling through"),
    }

    let guess = normalize_volume_label(volume_label);
    if !guess.is_empty() {
        match retry_once("metadata search", || search.search(&guess, None)) {
            Ok(candidates) => {
                if let Some(best) =
                    choose_best_match(&candidates, &guess, longest_title_secs, tuning)
                {
                    let identity = IdentityResult {
                        title: best.title,
                        year: best.year,
                        external_id: best.external_id,
                        runtime_secs: best.runtime_secs,
                        source: IdentitySource::MetadataService,
                    };
                    info!(title = %identity.title, "identified via metadata search");
                    cache.store(fingerprint, &identity)?;
                    return Ok(identity);
                }
            }
            Err(e) => warn!(error = %e, "metadata search unavailable, falling through"),
        }
    }

    if let Some(resolver) = manual {
        match resolver.resolve(volume_label) {
            Ok(Some(identity)) => {
                cache.store(fingerprint, &identity)?;
                return Ok(identity);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "manual resolution failed"),
        }
    }

    Err(IdentifyError::Unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct NoCommunity;
    impl CommunityLookup for NoCommunity {
        fn lookup(&self, _: &str) -> Result<Option<IdentityResult>, LookupError> {
            Ok(None)
        }
    }

    struct FixedCommunity(IdentityResult);
    impl CommunityLookup for FixedCommunity {
        fn lookup(&self, _: &str) -> Result<Option<IdentityResult>, LookupError> {
            Ok(Some(self.0.clone()))
        }
    }

    struct DownCommunity;
    impl CommunityLookup for DownCommunity {
        fn lookup(&self, _: &str) -> Result<Option<IdentityResult>, LookupError> {
            Err(LookupError("503".to_string()))
        }
    }

    /// Fails the first call, answers from the second on.
    struct FlakyCommunity {
        calls: AtomicU32,
        identity: IdentityResult,
    }

    impl CommunityLookup for FlakyCommunity {
        fn lookup(&self, _: &str) -> Result<Option<IdentityResult>, LookupError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LookupError("connection reset".to_string()))
            } else {
                Ok(Some(self.identity.clone()))
            }
        }
    }

    struct FixedSearch(Vec<SearchCandidate>);
    impl MetadataSearch for FixedSearch {
        fn search(
            &self,
            _: &str,
            _: Option<u16>,
        ) -> Result<Vec<SearchCandidate>, LookupError> {
            Ok(self.0.clone())
        }

        fn fetch_cover_art(&self, _: &str) -> Result<Option<Vec<u8>>, LookupError> {
            Ok(None)
        }
    }

    struct FixedManual(Option<IdentityResult>);
    impl ManualResolver for FixedManual {
        fn resolve(&self, _: &str) -> Result<Option<IdentityResult>, LookupError> {
            Ok(self.0.clone())
        }
    }

    fn identity(title: &str, source: IdentitySource) -> IdentityResult {
        IdentityResult {
            title: title.to_string(),
            year: Some(2004),
            external_id: Some("tt0358273".to_string()),
            runtime_secs: Some(8160),
            source,
        }
    }

    fn candidate(title: &str, runtime: Option<u64>) -> SearchCandidate {
        SearchCandidate {
            title: title.to_string(),
            year: Some(2004),
            external_id: Some("tt0358273".to_string()),
            runtime_secs: runtime,
        }
    }

    #[test]
    fn test_normalize_volume_label() {
        assert_eq!(normalize_volume_label("WALK_THE_LINE"), "Walk The Line");
        assert_eq!(normalize_volume_label("MOVIE_DISC_1"), "Movie");
        assert_eq!(normalize_volume_label("DARK_CITY_BLURAY"), "Dark City");
        assert_eq!(normalize_volume_label("old-film-dvd"), "Old Film");
        assert_eq!(normalize_volume_label("TITLE_2160P_REMASTERED"), "Title");
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_choose_best_match_runtime_window() {
        let tuning = TuningConfig::default();
        let candidates = vec![
            // Exact name but a cut twice as long as the disc: outside the window.
            candidate("Dark City", Some(20_000)),
            candidate("Dark Cities", Some(6_000)),
        ];
        let best = choose_best_match(&candidates, "Dark City", Some(6_100), &tuning)
            .expect("should match");
        assert_eq!(best.title, "Dark Cities");
    }

    #[test]
    fn test_choose_best_match_rejects_ambiguity() {
        let tuning = TuningConfig::default();
        // Two releases with the same title: neither clears the margin.
        let candidates = vec![
            candidate("The Movie", None),
            candidate("The Movie", None),
        ];
        assert_eq!(
            choose_best_match(&candidates, "The Movie", None, &tuning),
            None
        );
    }

    #[test]
    fn test_choose_best_match_rejects_low_similarity() {
        let tuning = TuningConfig::default();
        let candidates = vec![candidate("Completely Unrelated Documentary", None)];
        assert_eq!(
            choose_best_match(&candidates, "Dark City", None, &tuning),
            None
        );
    }

    #[test]
    fn test_cache_round_trip_and_corrupt_entry() {
        let dir = TempDir::new().unwrap();
        let cache = IdentityCache::new(dir.path());

        assert_eq!(cache.load("abc123"), None);

        let id = identity("Dark City", IdentitySource::CommunityDb);
        cache.store("abc123", &id).unwrap();
        assert_eq!(cache.load("abc123"), Some(id));

        fs::write(dir.path().join("identities/bad.json"), "{not json").unwrap();
        assert_eq!(cache.load("bad"), None);
    }

    #[test]
    fn test_chain_short_circuits_on_cache() {
        let dir = TempDir::new().unwrap();
        let cache = IdentityCache::new(dir.path());
        let cached = identity("Cached Film", IdentitySource::Manual);
        cache.store("fp", &cached).unwrap();

        let result = resolve_identity(
            &cache,
            &DownCommunity,
            &FixedSearch(vec![]),
            None,
            "fp",
            "SOME_LABEL",
            None,
            &TuningConfig::default(),
        )
        .unwrap();
        assert_eq!(result, cached);
    }

    #[test]
    fn test_chain_community_hit_is_cached() {
        let dir = TempDir::new().unwrap();
        let cache = IdentityCache::new(dir.path());
        let id = identity("Dark City", IdentitySource::CommunityDb);

        let result = resolve_identity(
            &cache,
            &FixedCommunity(id.clone()),
            &FixedSearch(vec![]),
            None,
            "fp",
            "DARK_CITY",
            None,
            &TuningConfig::default(),
        )
        .unwrap();
        assert_eq!(result, id);
        assert_eq!(cache.load("fp"), Some(id));
    }

    #[test]
    fn test_chain_retries_transient_community_failure() {
        let dir = TempDir::new().unwrap();
        let cache = IdentityCache::new(dir.path());
        let community = FlakyCommunity {
            calls: AtomicU32::new(0),
            identity: identity("Dark City", IdentitySource::CommunityDb),
        };

        let result = resolve_identity(
            &cache,
            &community,
            &FixedSearch(vec![]),
            None,
            "fp",
            "DARK_CITY",
            None,
            &TuningConfig::default(),
        )
        .unwrap();
        assert_eq!(result.title, "Dark City");
        assert_eq!(result.source, IdentitySource::CommunityDb);
        assert_eq!(community.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_chain_falls_through_to_search_when_community_down() {
        let dir = TempDir::new().unwrap();
        let cache = IdentityCache::new(dir.path());

        let result = resolve_identity(
            &cache,
            &DownCommunity,
            &FixedSearch(vec![candidate("Dark City", Some(6_000))]),
            None,
            "fp",
            "DARK_CITY",
            Some(6_100),
            &TuningConfig::default(),
        )
        .unwrap();
        assert_eq!(result.title, "Dark City");
        assert_eq!(result.source, IdentitySource::MetadataService);
    }

    #[test]
    fn test_chain_manual_fallback() {
        let dir = TempDir::new().unwrap();
        let cache = IdentityCache::new(dir.path());
        let manual = FixedManual(Some(identity("Typed In", IdentitySource::Manual)));

        let result = resolve_identity(
            &cache,
            &NoCommunity,
            &FixedSearch(vec![]),
            Some(&manual),
            "fp",
            "UNKNOWN_DISC",
            None,
            &TuningConfig::default(),
        )
        .unwrap();
        assert_eq!(result.source, IdentitySource::Manual);
    }

    #[test]
    fn test_chain_unresolved_without_manual() {
        let dir = TempDir::new().unwrap();
        let cache = IdentityCache::new(dir.path());

        let result = resolve_identity(
            &cache,
            &NoCommunity,
            &FixedSearch(vec![]),
            None,
            "fp",
            "UNKNOWN_DISC",
            None,
            &TuningConfig::default(),
        );
        assert!(matches!(result, Err(IdentifyError::Unresolved)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Similarity is symmetric, bounded to [0, 1], and 1.0 for equal
        // strings regardless of case.
        #[test]
        fn prop_similarity_properties(a in "[ -~]{0,30}", b in "[ -~]{0,30}") {
            let ab = similarity(&a, &b);
            let ba = similarity(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-9);
            prop_assert!((0.0..=1.0).contains(&ab));
            prop_assert!((similarity(&a, &a.to_uppercase()) - 1.0).abs() < 1e-9);
        }

        // Normalization never leaves separator characters behind.
        #[test]
        fn prop_normalize_strips_separators(label in "[A-Za-z0-9_.-]{0,40}") {
            let normalized = normalize_volume_label(&label);
            prop_assert!(!normalized.contains('_'));
            prop_assert!(!normalized.contains('-'));
            prop_assert!(!normalized.starts_with(' '));
            prop_assert!(!normalized.ends_with(' '));
        }
    }
}
