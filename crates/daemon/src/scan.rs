//! Disc layout scanner.
//!
//! Drives the extraction tool's robot info mode (`-r info disc:N`) and
//! parses its TINFO/SINFO line grammar into typed [`TitleCandidate`]s at
//! the adapter boundary, with explicit parse-failure errors.
//!
//! Authored track names are used only as hints here (commentary/forced/SDH
//! flags); the dynamic-range classifier has the final say on commentary.

use crate::proc::{run_with_timeout, ProcessError};
use crate::titles::{AudioTrack, ChannelLayout, SubtitleTrack, TitleCandidate};
use regex::Regex;
use std::collections::BTreeMap;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Output substrings that mean the disc itself is failing to read.
/// These are transient on some discs and retried upstream.
const READ_ERROR_SIGNATURES: [&str; 4] = [
    "medium error",
    "uncorrectable error",
    "scsi error",
    "lec uncorrectable",
];

// TINFO attribute ids in the robot output.
const TINFO_NAME: u32 = 2;
const TINFO_DURATION: u32 = 9;
const TINFO_SIZE: u32 = 10;
const TINFO_SOURCE_FILE: u32 = 27;

// SINFO attribute ids.
const SINFO_TYPE: u32 = 1;
const SINFO_LANG_CODE: u32 = 3;
const SINFO_LANG_NAME: u32 = 4;
const SINFO_CODEC_ID: u32 = 5;
const SINFO_CODEC_SHORT: u32 = 6;
const SINFO_CHANNELS: u32 = 13;
const SINFO_NAME: u32 = 30;
const SINFO_EXTRA: u32 = 31;

/// Error type for disc scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The info command exited non-zero without a read-error signature.
    #[error("disc scan failed: {0}")]
    ToolFailed(String),

    /// A read-error signature appeared in the tool output.
    #[error("disc read error: {0}")]
    ReadError(String),

    /// A TINFO/SINFO line matched the grammar but held an invalid field.
    #[error("failed to parse scan output: {0}")]
    Parse(String),

    /// The scan produced no titles at all.
    #[error("scan reported no titles")]
    NoTitles,

    /// Process-level failure (spawn, timeout).
    #[error(transparent)]
    Process(#[from] ProcessError),
}

fn tinfo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^TINFO:(\d+),(\d+),(\d+),"(.*)"$"#).unwrap())
}

fn sinfo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^SINFO:(\d+),(\d+),(\d+),(\d+),"(.*)"$"#).unwrap())
}

fn angle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Angle #(\d+) was added for title #(\d+)").unwrap())
}

/// Returns true if a tool output line carries a disc read-error signature.
pub fn contains_read_error(line: &str) -> bool {
    let low = line.to_lowercase();
    READ_ERROR_SIGNATURES.iter().any(|sig| low.contains(sig))
}

/// Builds the robot-mode info command for the extraction tool.
pub fn build_scan_command(tool: &str, disc_spec: &str) -> Command {
    let mut cmd = Command::new(tool);
    cmd.arg("-r").arg("info").arg(disc_spec);
    cmd
}

/// Runs the info scan and parses its output.
///
/// Read-error signatures abort immediately with [`ScanError::ReadError`] so
/// the caller can retry after resetting the drive.
pub fn scan_disc(tool: &str, disc_spec: &str, timeout: Duration) -> Result<Vec<TitleCandidate>, ScanError> {
    let cmd = build_scan_command(tool, disc_spec);
    let output = run_with_timeout(cmd, timeout)?;
    let combined = output.combined();

    for line in combined.lines() {
        if contains_read_error(line) {
            return Err(ScanError::ReadError(line.trim().to_string()));
        }
    }

    if !output.status.success() {
        return Err(ScanError::ToolFailed(format!(
            "info command exited with status {}",
            output.status
        )));
    }

    parse_scan_output(&combined)
}

/// Parses robot-mode info output into titles.
///
/// Unrecognized lines are skipped (the tool emits plenty of progress noise);
/// lines matching the TINFO/SINFO grammar with malformed fields are errors.
pub fn parse_scan_output(output: &str) -> Result<Vec<TitleCandidate>, ScanError> {
    // attr id -> value, keyed by title index
    let mut tinfo: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
    // (title, stream) -> attr id -> value
    let mut sinfo: BTreeMap<u32, BTreeMap<u32, BTreeMap<u32, String>>> = BTreeMap::new();
    let mut angles_detected = false;

    for raw_line in output.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if angle_re().is_match(line) {
            angles_detected = true;
            continue;
        }

        if let Some(caps) = tinfo_re().captures(line) {
            let title_index = parse_u32(&caps[1], line)?;
            let attr_id = parse_u32(&caps[2], line)?;
            let value = caps[4].to_string();
            tinfo.entry(title_index).or_default().insert(attr_id, value);
            continue;
        }

        if let Some(caps) = sinfo_re().captures(line) {
            let title_index = parse_u32(&caps[1], line)?;
            let stream_index = parse_u32(&caps[2], line)?;
            let attr_id = parse_u32(&caps[3], line)?;
            let value = caps[5].to_string();
            sinfo
                .entry(title_index)
                .or_default()
                .entry(stream_index)
                .or_default()
                .insert(attr_id, value);
        }
    }

    if tinfo.is_empty() {
        return Err(ScanError::NoTitles);
    }

    let mut titles = Vec::new();
    for (title_index, attrs) in &tinfo {
        let duration_secs = attrs
            .get(&TINFO_DURATION)
            .and_then(|s| parse_duration_secs(s))
            .unwrap_or(0);
        let size_bytes = attrs.get(&TINFO_SIZE).and_then(|s| parse_size_bytes(s));

        let mut audio_tracks = Vec::new();
        let mut subtitle_tracks = Vec::new();

        if let Some(streams) = sinfo.get(title_index) {
            for (stream_index, stream_attrs) in streams {
                let type_str = stream_attrs
                    .get(&SINFO_TYPE)
                    .map(|s| s.to_lowercase())
                    .unwrap_or_default();

                // Type detection by name works for both DVD and Blu-ray;
                // the numeric type codes differ between the two.
                if type_str.contains("audio") {
                    audio_tracks.push(parse_audio_track(*stream_index, stream_attrs));
                } else if type_str.contains("subtitle") {
                    subtitle_tracks.push(parse_subtitle_track(*stream_index, stream_attrs));
                }
            }
        }

        titles.push(TitleCandidate {
            index: *title_index,
            name: attrs.get(&TINFO_NAME).filter(|s| !s.is_empty()).cloned(),
            duration_secs,
            size_bytes,
            source_file: attrs
                .get(&TINFO_SOURCE_FILE)
                .filter(|s| !s.is_empty())
                .cloned(),
            audio_tracks,
            subtitle_tracks,
            ..Default::default()
        });
    }

    if angles_detected {
        titles = filter_angle_duplicates(titles);
    }

    Ok(titles)
}

/// When angles were announced, titles sharing an exact duration are camera
/// angles of the same content; keep the first per duration.
fn filter_angle_duplicates(titles: Vec<TitleCandidate>) -> Vec<TitleCandidate> {
    let mut seen_durations = std::collections::BTreeSet::new();
    titles
        .into_iter()
        .filter(|t| seen_durations.insert(t.duration_secs))
        .collect()
}

fn parse_u32(s: &str, line: &str) -> Result<u32, ScanError> {
    s.parse::<u32>()
        .map_err(|_| ScanError::Parse(format!("invalid index in line: {}", line)))
}

/// Parses "01:46:20" into seconds.
pub fn parse_duration_secs(s: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(\d+):(\d{2}):(\d{2})$").unwrap());
    let caps = re.captures(s.trim())?;
    let h: u64 = caps[1].parse().ok()?;
    let m: u64 = caps[2].parse().ok()?;
    let sec: u64 = caps[3].parse().ok()?;
    Some(h * 3600 + m * 60 + sec)
}

/// Parses "4.3 GB" / "812.0 MB" / "12.5 GiB" into bytes.
pub fn parse_size_bytes(s: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^([\d.]+)\s*([KMGTP]i?B)$").unwrap());
    let caps = re.captures(s.trim())?;
    let value: f64 = caps[1].parse().ok()?;
    let unit = caps[2].to_uppercase();

    let (base, prefix) = if unit.ends_with("IB") {
        (1024.0f64, unit.trim_end_matches("IB").to_string())
    } else {
        (1000.0f64, unit.trim_end_matches('B').to_string())
    };

    let exponent = match prefix.as_str() {
        "K" => 1,
        "M" => 2,
        "G" => 3,
        "T" => 4,
        "P" => 5,
        _ => return None,
    };

    Some((value * base.powi(exponent)) as u64)
}

/// Parses a channel layout out of free-form channel/name/codec text.
/// Specific about the numeric pattern so bitrates like "1.5 Mb/s" don't match.
fn parse_channel_layout(text: &str) -> ChannelLayout {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b([12567]\.[012])\b").unwrap());

    if let Some(caps) = re.captures(text) {
        return match &caps[1] {
            "7.1" | "7.2" => ChannelLayout::Surround71,
            "5.1" | "6.1" => ChannelLayout::Surround51,
            "2.0" | "2.1" => ChannelLayout::Stereo,
            "1.0" => ChannelLayout::Mono,
            _ => ChannelLayout::Unknown,
        };
    }

    let low = text.to_lowercase();
    if low.contains("stereo") {
        ChannelLayout::Stereo
    } else if low.contains("mono") {
        ChannelLayout::Mono
    } else if low.contains("surround") {
        ChannelLayout::Surround51
    } else {
        ChannelLayout::Unknown
    }
}

struct NameFlags {
    commentary: bool,
    forced: bool,
    sdh: bool,
}

fn detect_name_flags(attrs: &BTreeMap<u32, String>) -> NameFlags {
    let name = attrs.get(&SINFO_NAME).map(String::as_str).unwrap_or("");
    let extra = attrs.get(&SINFO_EXTRA).map(String::as_str).unwrap_or("");
    let codec_short = attrs
        .get(&SINFO_CODEC_SHORT)
        .map(String::as_str)
        .unwrap_or("");
    let combined = format!("{} {} {}", name, extra, codec_short).to_lowercase();

    NameFlags {
        commentary: combined.contains("commentary") || combined.contains("comment"),
        forced: combined.contains("forced"),
        sdh: combined.contains("sdh")
            || combined.contains("hearing")
            || combined.contains("impaired"),
    }
}

fn parse_audio_track(stream_index: u32, attrs: &BTreeMap<u32, String>) -> AudioTrack {
    let channels = attrs.get(&SINFO_CHANNELS).map(String::as_str).unwrap_or("");
    let name = attrs.get(&SINFO_NAME).map(String::as_str).unwrap_or("");
    let codec_short = attrs
        .get(&SINFO_CODEC_SHORT)
        .map(String::as_str)
        .unwrap_or("");
    let all_info = format!("{} {} {}", channels, name, codec_short);

    let flags = detect_name_flags(attrs);

    AudioTrack {
        stream_index,
        language: attrs
            .get(&SINFO_LANG_CODE)
            .cloned()
            .unwrap_or_else(|| "und".to_string()),
        language_name: attrs.get(&SINFO_LANG_NAME).cloned().unwrap_or_default(),
        codec_id: attrs.get(&SINFO_CODEC_ID).cloned().unwrap_or_default(),
        channel_layout: parse_channel_layout(&all_info),
        is_atmos: all_info.to_lowercase().contains("atmos"),
        is_commentary: flags.commentary,
        name: name.to_string(),
        dynamic_range_db: None,
        selected: false,
    }
}

fn parse_subtitle_track(stream_index: u32, attrs: &BTreeMap<u32, String>) -> SubtitleTrack {
    let flags = detect_name_flags(attrs);

    SubtitleTrack {
        stream_index,
        language: attrs
            .get(&SINFO_LANG_CODE)
            .cloned()
            .unwrap_or_else(|| "und".to_string()),
        language_name: attrs.get(&SINFO_LANG_NAME).cloned().unwrap_or_default(),
        codec_id: attrs.get(&SINFO_CODEC_ID).cloned().unwrap_or_default(),
        is_forced: flags.forced,
        is_sdh: flags.sdh,
        name: attrs.get(&SINFO_NAME).cloned().unwrap_or_default(),
        selected: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    const SAMPLE_OUTPUT: &str = r#"
MSG:1005,0,1,"MakeMKV started","%1 started","MakeMKV"
TINFO:0,2,0,"Main Feature"
TINFO:0,9,0,"01:46:20"
TINFO:0,10,0,"4.3 GB"
TINFO:0,27,0,"00001.mpls"
SINFO:0,0,1,6201,"Video"
SINFO:0,1,1,6202,"Audio"
SINFO:0,1,3,0,"eng"
SINFO:0,1,4,0,"English"
SINFO:0,1,5,0,"A_TRUEHD"
SINFO:0,1,13,0,"TrueHD Atmos 7.1"
SINFO:0,2,1,6202,"Audio"
SINFO:0,2,3,0,"eng"
SINFO:0,2,4,0,"English"
SINFO:0,2,5,0,"A_AC3"
SINFO:0,2,13,0,"Stereo"
SINFO:0,2,30,0,"Director's Commentary"
SINFO:0,3,1,6203,"Subtitles"
SINFO:0,3,3,0,"eng"
SINFO:0,3,4,0,"English"
SINFO:0,3,5,0,"S_HDMV/PGS"
TINFO:1,9,0,"00:02:11"
TINFO:1,10,0,"145.2 MB"
"#;

    #[test]
    fn test_parse_sample_output() {
        let titles = parse_scan_output(SAMPLE_OUTPUT).expect("should parse");
        assert_eq!(titles.len(), 2);

        let main = &titles[0];
        assert_eq!(main.index, 0);
        assert_eq!(main.name.as_deref(), Some("Main Feature"));
        assert_eq!(main.duration_secs, 6380);
        assert_eq!(main.size_bytes, Some(4_300_000_000));
        assert_eq!(main.source_file.as_deref(), Some("00001.mpls"));
        assert_eq!(main.audio_tracks.len(), 2);
        assert_eq!(main.subtitle_tracks.len(), 1);

        let primary = &main.audio_tracks[0];
        assert_eq!(primary.language, "eng");
        assert_eq!(primary.codec_id, "A_TRUEHD");
        assert_eq!(primary.channel_layout, ChannelLayout::Surround71);
        assert!(primary.is_atmos);
        assert!(!primary.is_commentary);

        let commentary = &main.audio_tracks[1];
        assert_eq!(commentary.channel_layout, ChannelLayout::Stereo);
        assert!(commentary.is_commentary);

        let sub = &main.subtitle_tracks[0];
        assert_eq!(sub.language, "eng");
        assert_eq!(sub.codec_id, "S_HDMV/PGS");
        assert!(!sub.is_forced);

        let extra = &titles[1];
        assert_eq!(extra.duration_secs, 131);
        assert!(extra.audio_tracks.is_empty());
    }

    #[test]
    fn test_parse_empty_output_is_no_titles() {
        assert!(matches!(
            parse_scan_output("MSG:1005,0,1,\"started\",\"x\",\"y\""),
            Err(ScanError::NoTitles)
        ));
    }

    #[test]
    fn test_angle_duplicates_filtered() {
        let output = r#"
MSG:3307,0,2,"Angle #2 was added for title #1","x","y"
TINFO:0,9,0,"01:40:00"
TINFO:1,9,0,"01:40:00"
TINFO:2,9,0,"00:05:00"
"#;
        let titles = parse_scan_output(output).expect("should parse");
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[0].index, 0);
        assert_eq!(titles[1].index, 2);
    }

    #[test]
    fn test_no_angle_announcement_keeps_equal_durations() {
        let output = r#"
TINFO:0,9,0,"01:40:00"
TINFO:1,9,0,"01:40:00"
"#;
        let titles = parse_scan_output(output).expect("should parse");
        assert_eq!(titles.len(), 2);
    }

    #[test]
    fn test_read_error_signatures() {
        assert!(contains_read_error("Error 'Scsi error - MEDIUM ERROR:L-EC UNCORRECTABLE ERROR'"));
        assert!(contains_read_error("MEDIUM ERROR at offset 123456"));
        assert!(!contains_read_error("Saved 1 titles into directory"));
    }

    #[test]
    fn test_parse_duration_secs() {
        assert_eq!(parse_duration_secs("01:46:20"), Some(6380));
        assert_eq!(parse_duration_secs("00:00:59"), Some(59));
        assert_eq!(parse_duration_secs("10:00:00"), Some(36000));
        assert_eq!(parse_duration_secs("garbage"), None);
        assert_eq!(parse_duration_secs("1:2:3"), None);
    }

    #[test]
    fn test_parse_size_bytes() {
        assert_eq!(parse_size_bytes("4.3 GB"), Some(4_300_000_000));
        assert_eq!(parse_size_bytes("812.0 MB"), Some(812_000_000));
        assert_eq!(parse_size_bytes("1.0 GiB"), Some(1_073_741_824));
        assert_eq!(parse_size_bytes("weird"), None);
    }

    #[test]
    fn test_channel_layout_ignores_bitrates() {
        assert_eq!(parse_channel_layout("448 Kb/s 1.5 Mb/s"), ChannelLayout::Unknown);
        assert_eq!(parse_channel_layout("Surround 5.1"), ChannelLayout::Surround51);
        assert_eq!(parse_channel_layout("TrueHD Atmos 7.1"), ChannelLayout::Surround71);
        assert_eq!(parse_channel_layout("Stereo"), ChannelLayout::Stereo);
        assert_eq!(parse_channel_layout("mono track"), ChannelLayout::Mono);
        assert_eq!(parse_channel_layout("surround mix"), ChannelLayout::Surround51);
    }

    #[test]
    fn test_build_scan_command() {
        let cmd = build_scan_command("makemkvcon", "disc:0");
        assert_eq!(cmd.get_program(), OsStr::new("makemkvcon"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, vec!["-r", "info", "disc:0"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Every well-formed duration string round-trips through formatting.
        #[test]
        fn prop_duration_parse_total_over_well_formed(
            h in 0u64..100,
            m in 0u64..60,
            s in 0u64..60,
        ) {
            let text = format!("{:02}:{:02}:{:02}", h, m, s);
            prop_assert_eq!(parse_duration_secs(&text), Some(h * 3600 + m * 60 + s));
        }

        // Well-formed TINFO lines always produce a title with that index.
        #[test]
        fn prop_tinfo_lines_produce_titles(
            index in 0u32..50,
            h in 0u64..4,
            m in 0u64..60,
        ) {
            let output = format!("TINFO:{},9,0,\"{:02}:{:02}:00\"", index, h, m);
            let titles = parse_scan_output(&output).expect("well-formed line parses");
            prop_assert_eq!(titles.len(), 1);
            prop_assert_eq!(titles[0].index, index);
            prop_assert_eq!(titles[0].duration_secs, h * 3600 + m * 60);
        }

        // Angle filtering never keeps two titles with the same duration and
        // always keeps the lowest index per duration.
        #[test]
        fn prop_angle_filter_keeps_first_per_duration(
            durations in prop::collection::vec(0u64..5000, 1..20),
        ) {
            let titles: Vec<TitleCandidate> = durations
                .iter()
                .enumerate()
                .map(|(i, d)| TitleCandidate {
                    index: i as u32,
                    duration_secs: *d,
                    ..Default::default()
                })
                .collect();

            let filtered = filter_angle_duplicates(titles);

            let mut seen = std::collections::BTreeSet::new();
            for t in &filtered {
                prop_assert!(seen.insert(t.duration_secs), "duplicate duration survived");
                let first_index = durations
                    .iter()
                    .position(|d| *d == t.duration_secs)
                    .unwrap() as u32;
                prop_assert_eq!(t.index, first_index);
            }
        }
    }
}
