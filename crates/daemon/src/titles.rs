//! Typed disc/title/track model shared across the pipeline.
//!
//! Everything the scanner parses out of the extraction tool ends up here as
//! plain data; the selector and orchestrator mutate only `classification`
//! and the per-track `selected` flags.

use serde::{Deserialize, Serialize};

/// Kind of optical disc, detected from the volume structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscKind {
    Dvd,
    BluRay,
}

impl std::fmt::Display for DiscKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscKind::Dvd => write!(f, "dvd"),
            DiscKind::BluRay => write!(f, "blu-ray"),
        }
    }
}

/// How the selector classified a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Not yet classified.
    Unclassified,
    /// The single title judged to be the movie itself.
    MainFeature,
    /// Bonus content worth keeping under extras/.
    Extra,
    /// Menu loops, trailers, sub-noise-floor fragments.
    Ignored,
}

impl Default for Classification {
    fn default() -> Self {
        Self::Unclassified
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Unclassified => write!(f, "unclassified"),
            Classification::MainFeature => write!(f, "main_feature"),
            Classification::Extra => write!(f, "extra"),
            Classification::Ignored => write!(f, "ignored"),
        }
    }
}

/// Channel layout of an audio track, ordered by richness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Unknown,
    Mono,
    Stereo,
    Surround51,
    Surround71,
}

impl Default for ChannelLayout {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ChannelLayout {
    /// Base quality score: surround beats stereo beats mono.
    pub fn score(&self) -> u32 {
        match self {
            ChannelLayout::Surround71 => 400,
            ChannelLayout::Surround51 => 300,
            ChannelLayout::Stereo => 200,
            ChannelLayout::Mono => 100,
            ChannelLayout::Unknown => 0,
        }
    }
}

impl std::fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelLayout::Unknown => write!(f, "unknown"),
            ChannelLayout::Mono => write!(f, "Mono"),
            ChannelLayout::Stereo => write!(f, "Stereo"),
            ChannelLayout::Surround51 => write!(f, "5.1 Surround"),
            ChannelLayout::Surround71 => write!(f, "7.1 Surround"),
        }
    }
}

/// An audio track on a title.
///
/// `is_commentary` starts from the authored track name (a hint only) and is
/// later confirmed or set by the dynamic-range classifier. `selected` is
/// owned by the selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AudioTrack {
    /// Stream index within the title, as reported by the extraction tool.
    pub stream_index: u32,
    /// ISO 639-2 language code ("eng", "swe", "und").
    pub language: String,
    /// Human-readable language name.
    pub language_name: String,
    /// Raw codec id (e.g. "A_TRUEHD", "A_AC3").
    pub codec_id: String,
    pub channel_layout: ChannelLayout,
    pub is_atmos: bool,
    pub is_commentary: bool,
    /// Authored track name from the disc, if any.
    pub name: String,
    /// Measured dynamic range in dB, once analyzed.
    pub dynamic_range_db: Option<f64>,
    pub selected: bool,
}

impl AudioTrack {
    /// Lossless codecs score above lossy ones when picking the primary track.
    pub fn is_lossless(&self) -> bool {
        let codec = self.codec_id.to_lowercase();
        ["truehd", "dts-hd", "dts:x", "flac", "pcm", "lpcm"]
            .iter()
            .any(|c| codec.contains(c))
    }

    /// Quality score for primary-track selection. Higher is better:
    /// channel richness dominates, lossless adds 50, Atmos adds 25.
    pub fn quality_score(&self) -> u32 {
        let mut score = self.channel_layout.score();
        if self.is_lossless() {
            score += 50;
        }
        if self.is_atmos {
            score += 25;
        }
        score
    }
}

/// A subtitle track on a title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SubtitleTrack {
    pub stream_index: u32,
    /// ISO 639-2 language code.
    pub language: String,
    pub language_name: String,
    /// Raw codec id (e.g. "S_HDMV/PGS").
    pub codec_id: String,
    pub is_forced: bool,
    pub is_sdh: bool,
    /// Authored track name from the disc, if any.
    pub name: String,
    pub selected: bool,
}

/// One extractable title as reported by the disc scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TitleCandidate {
    /// Title index on the disc, used to address the extraction output file.
    pub index: u32,
    pub name: Option<String>,
    pub duration_secs: u64,
    pub size_bytes: Option<u64>,
    /// Playlist or VOB source file, when reported.
    pub source_file: Option<String>,
    pub audio_tracks: Vec<AudioTrack>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub classification: Classification,
}
