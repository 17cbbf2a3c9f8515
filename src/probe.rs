//! Media probe: technical metadata via the engine's structured output

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::MasterError;
use crate::locator::EngineLocator;
use crate::types::{AudioAnalysis, VolumeStats};

/// ffprobe reports most numeric fields as JSON strings; everything is kept
/// optional and resolved with explicit fallbacks below.
#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    format: Option<FormatSection>,
    #[serde(default)]
    streams: Vec<StreamSection>,
}

#[derive(Debug, Default, Deserialize)]
struct FormatSection {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamSection {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    bits_per_sample: Option<u32>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

/// Probe a file for container and stream metadata.
///
/// Fails with [`MasterError::NoAudioStream`] when the file has no audio
/// stream and [`MasterError::ProbeProcess`] when the engine misbehaves.
/// Volume fields are left at their documented defaults; a volume scan
/// refines them separately.
pub async fn probe(locator: &EngineLocator, path: &Path) -> Result<AudioAnalysis, MasterError> {
    debug!(path = %path.display(), "probing");
    let output = Command::new(locator.ffprobe())
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-i",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MasterError::ProbeProcess {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_probe_report(&output.stdout, path)
}

/// Parse the engine's JSON report into an [`AudioAnalysis`].
fn parse_probe_report(raw: &[u8], path: &Path) -> Result<AudioAnalysis, MasterError> {
    let report: ProbeReport =
        serde_json::from_slice(raw).map_err(|e| MasterError::ProbeParse(e.to_string()))?;

    let stream = report
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| MasterError::NoAudioStream(path.to_path_buf()))?;

    let format = report.format.unwrap_or_default();

    // Container-level duration/bitrate win; stream-level values are the fallback.
    let duration_secs = parse_f64(format.duration.as_deref())
        .or_else(|| parse_f64(stream.duration.as_deref()))
        .ok_or_else(|| MasterError::ProbeParse("missing duration".into()))?;
    let bit_rate_bps = parse_u64(format.bit_rate.as_deref())
        .or_else(|| parse_u64(stream.bit_rate.as_deref()))
        .unwrap_or(0);

    let sample_rate_hz = parse_u64(stream.sample_rate.as_deref())
        .filter(|&rate| rate > 0)
        .ok_or_else(|| MasterError::ProbeParse("missing sample_rate".into()))?
        as u32;
    let channels = stream
        .channels
        .filter(|&c| c > 0)
        .ok_or_else(|| MasterError::ProbeParse("missing channels".into()))?;

    let codec = stream
        .codec_name
        .clone()
        .or(format.format_name)
        .unwrap_or_else(|| "unknown".to_string());
    let bit_depth = stream.bits_per_sample.filter(|&bits| bits > 0).unwrap_or(16);

    let defaults = VolumeStats::default();
    Ok(AudioAnalysis {
        duration_secs,
        sample_rate_hz,
        bit_rate_bps,
        channels,
        format: codec,
        bit_depth,
        max_volume_db: defaults.max_volume_db,
        mean_volume_db: defaults.mean_volume_db,
        loudness: None,
    })
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_u64(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(raw: &str) -> Result<AudioAnalysis, MasterError> {
        parse_probe_report(raw.as_bytes(), &PathBuf::from("input.wav"))
    }

    const FULL_REPORT: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "mjpeg"},
            {"codec_type": "audio", "codec_name": "flac", "sample_rate": "44100",
             "channels": 2, "bits_per_sample": 24, "duration": "180.5", "bit_rate": "900000"}
        ],
        "format": {"format_name": "flac", "duration": "181.000000", "bit_rate": "912345"}
    }"#;

    #[test]
    fn parses_a_complete_report() {
        let analysis = parse(FULL_REPORT).unwrap();
        assert_eq!(analysis.duration_secs, 181.0);
        assert_eq!(analysis.bit_rate_bps, 912_345);
        assert_eq!(analysis.sample_rate_hz, 44_100);
        assert_eq!(analysis.channels, 2);
        assert_eq!(analysis.format, "flac");
        assert_eq!(analysis.bit_depth, 24);
        assert!(analysis.loudness.is_none());
    }

    #[test]
    fn skips_non_audio_streams() {
        let analysis = parse(FULL_REPORT).unwrap();
        // The first stream is video; the audio stream's codec must win.
        assert_eq!(analysis.format, "flac");
    }

    #[test]
    fn no_audio_stream_is_a_distinct_error() {
        let raw = r#"{"streams": [{"codec_type": "video", "codec_name": "h264"}],
                      "format": {"duration": "10.0"}}"#;
        assert!(matches!(parse(raw), Err(MasterError::NoAudioStream(_))));
    }

    #[test]
    fn falls_back_to_stream_level_duration_and_bitrate() {
        let raw = r#"{
            "streams": [{"codec_type": "audio", "codec_name": "mp3",
                         "sample_rate": "48000", "channels": 2,
                         "duration": "42.5", "bit_rate": "320000"}],
            "format": {"duration": "N/A"}
        }"#;
        let analysis = parse(raw).unwrap();
        assert_eq!(analysis.duration_secs, 42.5);
        assert_eq!(analysis.bit_rate_bps, 320_000);
    }

    #[test]
    fn bit_depth_defaults_to_16_when_absent() {
        let raw = r#"{
            "streams": [{"codec_type": "audio", "codec_name": "mp3",
                         "sample_rate": "44100", "channels": 2}],
            "format": {"duration": "30.0", "bit_rate": "192000"}
        }"#;
        let analysis = parse(raw).unwrap();
        assert_eq!(analysis.bit_depth, 16);
    }

    #[test]
    fn missing_duration_everywhere_is_a_parse_error() {
        let raw = r#"{
            "streams": [{"codec_type": "audio", "codec_name": "wav",
                         "sample_rate": "44100", "channels": 2}],
            "format": {}
        }"#;
        assert!(matches!(parse(raw), Err(MasterError::ProbeParse(_))));
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        assert!(matches!(
            parse("this is not json"),
            Err(MasterError::ProbeParse(_))
        ));
    }
}
