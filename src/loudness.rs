//! Loudness and volume measurement via the engine's analysis filters
//!
//! Measurement is best-effort by contract: a failed scan logs a warning and
//! substitutes the documented defaults instead of failing the job. The
//! substitution is visible to callers through the `degraded` flag.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::locator::EngineLocator;
use crate::types::{LoudnessMeasurement, VolumeStats};

/// Measurement parameters passed to the loudness filter. The targets here
/// only shape the report, not the audio; the null muxer discards the output.
const LOUDNORM_MEASURE: &str = "loudnorm=I=-23:TP=-2:LRA=7:print_format=json";

/// Fields arrive as JSON strings, matching the engine's report format.
#[derive(Debug, Deserialize)]
struct LoudnormReport {
    input_i: String,
    input_lra: String,
    input_tp: String,
    input_thresh: String,
}

/// Measure integrated loudness, range, true peak and threshold.
///
/// Never fails: any process or parse problem degrades to
/// [`LoudnessMeasurement::fallback`] with a warning.
pub async fn measure_loudness(locator: &EngineLocator, path: &Path) -> LoudnessMeasurement {
    let result = Command::new(locator.ffmpeg())
        .arg("-i")
        .arg(path)
        .args(["-filter:a", LOUDNORM_MEASURE, "-f", "null", "-"])
        .output()
        .await;

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "loudness scan failed to spawn, using defaults");
            return LoudnessMeasurement::fallback();
        }
    };
    if !output.status.success() {
        warn!(
            path = %path.display(),
            code = ?output.status.code(),
            "loudness scan exited non-zero, using defaults"
        );
        return LoudnessMeasurement::fallback();
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    match parse_loudnorm_report(&stderr) {
        Some(measurement) => {
            debug!(
                path = %path.display(),
                integrated = measurement.integrated_lufs,
                true_peak = measurement.true_peak_db,
                "loudness measured"
            );
            measurement
        }
        None => {
            warn!(path = %path.display(), "no loudness report in engine output, using defaults");
            LoudnessMeasurement::fallback()
        }
    }
}

/// Extract the JSON report block from the analysis pass stderr.
fn parse_loudnorm_report(stderr: &str) -> Option<LoudnessMeasurement> {
    let start = stderr.find('{')?;
    let end = stderr[start..].find('}')? + start;
    let report: LoudnormReport = serde_json::from_str(&stderr[start..=end]).ok()?;

    let integrated_lufs: f64 = report.input_i.trim().parse().ok()?;
    let loudness_range: f64 = report.input_lra.trim().parse().ok()?;
    let true_peak_db: f64 = report.input_tp.trim().parse().ok()?;
    let threshold_db: f64 = report.input_thresh.trim().parse().ok()?;
    if !(integrated_lufs.is_finite()
        && loudness_range.is_finite()
        && true_peak_db.is_finite()
        && threshold_db.is_finite())
    {
        return None;
    }

    Some(LoudnessMeasurement {
        integrated_lufs,
        loudness_range,
        true_peak_db,
        threshold_db,
        degraded: false,
    })
}

/// Scan peak and mean levels. Degrades to [`VolumeStats::default`] per field.
pub async fn measure_volume(locator: &EngineLocator, path: &Path) -> VolumeStats {
    let result = Command::new(locator.ffmpeg())
        .arg("-i")
        .arg(path)
        .args(["-filter:a", "volumedetect", "-f", "null", "-"])
        .output()
        .await;

    match result {
        Ok(output) => parse_volume_report(&String::from_utf8_lossy(&output.stderr)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "volume scan failed to spawn, using defaults");
            VolumeStats::default()
        }
    }
}

fn parse_volume_report(stderr: &str) -> VolumeStats {
    let defaults = VolumeStats::default();
    let mut stats = defaults;
    for line in stderr.lines() {
        if let Some(value) = labeled_db(line, "max_volume:") {
            stats.max_volume_db = value;
        } else if let Some(value) = labeled_db(line, "mean_volume:") {
            stats.mean_volume_db = value;
        }
    }
    stats
}

/// Parse `... <label> <value> dB` out of a diagnostic line.
fn labeled_db(line: &str, label: &str) -> Option<f64> {
    let idx = line.find(label)?;
    let rest = line[idx + label.len()..].trim_start();
    let number = rest.split_whitespace().next()?;
    number.parse().ok()
}
