//! Core settings structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading settings file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read settings file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse settings: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Library and filesystem layout settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Root of the final media library
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Base directory for per-disc job workspaces
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,
    /// Directory for job records and the identity cache
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory scanned for mounted disc volumes
    #[serde(default = "default_volumes_root")]
    pub volumes_root: PathBuf,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("/srv/media/movies")
}

fn default_temp_root() -> PathBuf {
    PathBuf::from("/var/tmp/autorip")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/autorip")
}

fn default_volumes_root() -> PathBuf {
    PathBuf::from("/media")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            temp_root: default_temp_root(),
            state_dir: default_state_dir(),
            volumes_root: default_volumes_root(),
        }
    }
}

/// Audio and subtitle track preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackConfig {
    /// Preferred audio languages, ordered (ISO 639-2 codes)
    #[serde(default = "default_audio_languages")]
    pub preferred_audio_languages: Vec<String>,
    /// Preferred subtitle languages, ordered (ISO 639-2 codes)
    #[serde(default = "default_subtitle_languages")]
    pub preferred_subtitle_languages: Vec<String>,
    /// Keep commentary audio tracks as secondary tracks
    #[serde(default)]
    pub include_commentary: bool,
    /// Keep forced subtitle tracks in preferred languages
    #[serde(default = "default_true")]
    pub include_forced_subs: bool,
    /// Keep SDH (hearing-impaired) subtitle tracks
    #[serde(default)]
    pub include_sdh_subs: bool,
}

fn default_audio_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_subtitle_languages() -> Vec<String> {
    vec!["eng".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            preferred_audio_languages: default_audio_languages(),
            preferred_subtitle_languages: default_subtitle_languages(),
            include_commentary: false,
            include_forced_subs: true,
            include_sdh_subs: false,
        }
    }
}

/// Named transcoder presets, one per disc kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresetConfig {
    #[serde(default = "default_preset_dvd")]
    pub dvd: String,
    #[serde(default = "default_preset_bluray")]
    pub bluray: String,
}

fn default_preset_dvd() -> String {
    "HQ 720p30 Surround".to_string()
}

fn default_preset_bluray() -> String {
    "HQ 1080p30 Surround".to_string()
}

impl Default for PresetConfig {
    fn default() -> Self {
        Self {
            dvd: default_preset_dvd(),
            bluray: default_preset_bluray(),
        }
    }
}

/// Paths to the external tools the pipeline drives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Disc extraction tool (scan + rip)
    #[serde(default = "default_extractor")]
    pub extractor: String,
    /// Transcoding tool
    #[serde(default = "default_transcoder")]
    pub transcoder: String,
    /// Container tag-write tool (optional at runtime)
    #[serde(default = "default_tagger")]
    pub tagger: String,
    /// ffmpeg binary used for audio analysis (optional at runtime)
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// Eject command for freeing the drive
    #[serde(default = "default_eject")]
    pub eject: String,
}

fn default_extractor() -> String {
    "makemkvcon".to_string()
}

fn default_transcoder() -> String {
    "HandBrakeCLI".to_string()
}

fn default_tagger() -> String {
    "mkvpropedit".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_eject() -> String {
    "eject".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            extractor: default_extractor(),
            transcoder: default_transcoder(),
            tagger: default_tagger(),
            ffmpeg: default_ffmpeg(),
            eject: default_eject(),
        }
    }
}

/// Tunable heuristic thresholds
///
/// These are deliberate configuration, not contracts: the selector and the
/// commentary classifier read them instead of hard-coding constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TuningConfig {
    /// Minimum duration for a main-feature candidate (seconds)
    #[serde(default = "default_main_feature_min_secs")]
    pub main_feature_min_secs: u64,
    /// Titles shorter than this are ignored entirely (seconds)
    #[serde(default = "default_extra_noise_floor_secs")]
    pub extra_noise_floor_secs: u64,
    /// Accepted distance between candidate runtime and disc runtime (seconds)
    #[serde(default = "default_runtime_tolerance_secs")]
    pub runtime_tolerance_secs: u64,
    /// Minimum textual similarity for an automatic metadata-search match
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Required similarity lead over the runner-up match
    #[serde(default = "default_similarity_margin")]
    pub similarity_margin: f64,
    /// Dynamic range below this marks a track as commentary (dB)
    #[serde(default = "default_commentary_dynamic_range_db")]
    pub commentary_dynamic_range_db: f64,
    /// Length of the audio sample window analyzed per track (seconds)
    #[serde(default = "default_audio_sample_secs")]
    pub audio_sample_secs: u64,
    /// Offset into the stream before sampling, to skip intros (seconds)
    #[serde(default = "default_audio_sample_offset_secs")]
    pub audio_sample_offset_secs: u64,
}

fn default_main_feature_min_secs() -> u64 {
    45 * 60
}

fn default_extra_noise_floor_secs() -> u64 {
    60
}

fn default_runtime_tolerance_secs() -> u64 {
    600
}

fn default_min_similarity() -> f64 {
    0.55
}

fn default_similarity_margin() -> f64 {
    0.10
}

fn default_commentary_dynamic_range_db() -> f64 {
    20.0
}

fn default_audio_sample_secs() -> u64 {
    120
}

fn default_audio_sample_offset_secs() -> u64 {
    600
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            main_feature_min_secs: default_main_feature_min_secs(),
            extra_noise_floor_secs: default_extra_noise_floor_secs(),
            runtime_tolerance_secs: default_runtime_tolerance_secs(),
            min_similarity: default_min_similarity(),
            similarity_margin: default_similarity_margin(),
            commentary_dynamic_range_db: default_commentary_dynamic_range_db(),
            audio_sample_secs: default_audio_sample_secs(),
            audio_sample_offset_secs: default_audio_sample_offset_secs(),
        }
    }
}

/// Retry policy for disc reads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Attempts for the layout scan
    #[serde(default = "default_scan_attempts")]
    pub scan_attempts: u32,
    /// Attempts for the extraction run
    #[serde(default = "default_extract_attempts")]
    pub extract_attempts: u32,
    /// Base backoff between attempts, doubled each retry (seconds)
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

fn default_scan_attempts() -> u32 {
    3
}

fn default_extract_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            scan_attempts: default_scan_attempts(),
            extract_attempts: default_extract_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

/// Upper bounds on external process runtime (seconds)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_secs: u64,
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_secs: u64,
    #[serde(default = "default_transcode_timeout_secs")]
    pub transcode_secs: u64,
    #[serde(default = "default_tag_timeout_secs")]
    pub tag_secs: u64,
    #[serde(default = "default_analyze_timeout_secs")]
    pub analyze_secs: u64,
    #[serde(default = "default_network_timeout_secs")]
    pub network_secs: u64,
}

fn default_scan_timeout_secs() -> u64 {
    180
}

fn default_extract_timeout_secs() -> u64 {
    4 * 3600
}

fn default_transcode_timeout_secs() -> u64 {
    6 * 3600
}

fn default_tag_timeout_secs() -> u64 {
    120
}

fn default_analyze_timeout_secs() -> u64 {
    60
}

fn default_network_timeout_secs() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scan_secs: default_scan_timeout_secs(),
            extract_secs: default_extract_timeout_secs(),
            transcode_secs: default_transcode_timeout_secs(),
            tag_secs: default_tag_timeout_secs(),
            analyze_secs: default_analyze_timeout_secs(),
            network_secs: default_network_timeout_secs(),
        }
    }
}

/// Transcode concurrency settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TranscodeConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
    /// Maximum parallel transcodes (0 = auto-derive from cores)
    #[serde(default)]
    pub max_concurrent: u32,
}

/// Network lookup service endpoints
///
/// Both are optional; a missing endpoint disables that stage of the
/// identity chain rather than failing it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServicesConfig {
    /// Community disc database base URL (fingerprint lookups)
    #[serde(default)]
    pub community_url: Option<String>,
    /// Metadata search service base URL (title search and cover art)
    #[serde(default)]
    pub metadata_url: Option<String>,
}

/// Main settings structure
///
/// Constructed once per job and passed by reference through every component;
/// no process-wide mutable configuration exists.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub tracks: TrackConfig,
    #[serde(default)]
    pub presets: PresetConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        Ok(settings)
    }

    /// Apply environment variable overrides
    ///
    /// Overrides the following values if environment variables are set:
    /// - AUTORIP_OUTPUT_ROOT -> library.output_root
    /// - AUTORIP_TEMP_ROOT -> library.temp_root
    /// - AUTORIP_STATE_DIR -> library.state_dir
    /// - AUTORIP_MAX_CONCURRENT_TRANSCODES -> transcode.max_concurrent
    /// - AUTORIP_INCLUDE_COMMENTARY -> tracks.include_commentary
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("AUTORIP_OUTPUT_ROOT") {
            if !val.is_empty() {
                self.library.output_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("AUTORIP_TEMP_ROOT") {
            if !val.is_empty() {
                self.library.temp_root = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("AUTORIP_STATE_DIR") {
            if !val.is_empty() {
                self.library.state_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("AUTORIP_MAX_CONCURRENT_TRANSCODES") {
            if let Ok(n) = val.parse::<u32>() {
                self.transcode.max_concurrent = n;
            }
        }

        if let Ok(val) = env::var("AUTORIP_INCLUDE_COMMENTARY") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.tracks.include_commentary = true,
                "false" | "0" | "no" => self.tracks.include_commentary = false,
                _ => {} // Invalid value, keep existing
            }
        }
    }

    /// Load settings from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut settings = Self::load_from_file(path)?;
        settings.apply_env_overrides();
        Ok(settings)
    }
}
