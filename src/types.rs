//! Shared type definitions for the mastering worker

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Technical metadata for one audio file, as reported by the external engine.
///
/// Created per probe invocation, never mutated after the analysis phase, and
/// discarded with the job that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    pub duration_secs: f64,
    pub sample_rate_hz: u32,
    pub bit_rate_bps: u64,
    pub channels: u32,
    /// Codec identifier (falls back to the container format name).
    pub format: String,
    pub bit_depth: u32,
    /// Peak level in dBFS; `VolumeStats` defaults until a volume scan runs.
    pub max_volume_db: f64,
    /// Mean level in dBFS; `VolumeStats` defaults until a volume scan runs.
    pub mean_volume_db: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loudness: Option<LoudnessMeasurement>,
}

impl AudioAnalysis {
    /// Merge in the results of a volume scan.
    pub fn apply_volume(&mut self, volume: VolumeStats) {
        self.max_volume_db = volume.max_volume_db;
        self.mean_volume_db = volume.mean_volume_db;
    }
}

/// EBU R128 measurement extracted from the engine's loudness report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoudnessMeasurement {
    pub integrated_lufs: f64,
    /// Loudness range (LRA) in LU.
    pub loudness_range: f64,
    pub true_peak_db: f64,
    pub threshold_db: f64,
    /// True when measurement failed and the documented defaults were
    /// substituted. Degraded measurements never fail a job.
    pub degraded: bool,
}

impl LoudnessMeasurement {
    /// The fixed record substituted when measurement fails.
    pub fn fallback() -> Self {
        Self {
            integrated_lufs: -14.0,
            loudness_range: 7.0,
            true_peak_db: -1.0,
            threshold_db: -24.0,
            degraded: true,
        }
    }
}

/// Peak/mean level scan from the engine's volume-detection filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStats {
    pub max_volume_db: f64,
    pub mean_volume_db: f64,
}

impl Default for VolumeStats {
    /// Documented defaults substituted when a field is never observed.
    fn default() -> Self {
        Self {
            max_volume_db: -6.0,
            mean_volume_db: -20.0,
        }
    }
}

/// Deterministic band-energy and width estimate for a reference track.
///
/// Band energies are fractions of total spectral power, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectralEstimate {
    pub bass_energy: f64,
    pub mid_energy: f64,
    pub treble_energy: f64,
    /// Fractional width on the 0.8..1.5 scale; 1.0 = unchanged.
    pub stereo_width: f64,
}

impl SpectralEstimate {
    /// Multiplier-neutral estimate used when a reference cannot be decoded:
    /// every derived EQ/width adjustment comes out as the identity.
    pub fn neutral() -> Self {
        Self {
            bass_energy: 0.5,
            mid_energy: 0.5,
            treble_energy: 1.0 / 3.0,
            stereo_width: 1.0,
        }
    }
}

/// A shelving EQ band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfBand {
    pub freq_hz: f64,
    pub gain_db: f64,
}

/// A parametric peaking EQ band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakBand {
    pub freq_hz: f64,
    pub gain_db: f64,
    pub q: f64,
}

/// Tonal shaping stages; absent bands are skipped entirely when the filter
/// chain is built.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqSettings {
    pub low_shelf: Option<ShelfBand>,
    pub peak: Option<PeakBand>,
    pub high_shelf: Option<ShelfBand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressorSettings {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterSettings {
    pub threshold_db: f64,
    pub release_ms: f64,
}

/// Complete parameter set for one mastering run. Constructed once per job by
/// the preset catalog or the reference resolver, then read-only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteringSettings {
    pub eq: EqSettings,
    pub compression: CompressorSettings,
    pub limiting: LimiterSettings,
    /// 100 = unchanged; values within 5 of 100 are treated as a no-op.
    pub stereo_width_percent: f64,
    pub target_lufs: f64,
}

impl MasteringSettings {
    /// Check the catalog invariants: every numeric field finite, compressor
    /// and limiter thresholds strictly negative.
    pub fn validate(&self) -> Result<(), String> {
        let mut fields: Vec<(&str, f64)> = vec![
            ("compression.threshold_db", self.compression.threshold_db),
            ("compression.ratio", self.compression.ratio),
            ("compression.attack_ms", self.compression.attack_ms),
            ("compression.release_ms", self.compression.release_ms),
            ("limiting.threshold_db", self.limiting.threshold_db),
            ("limiting.release_ms", self.limiting.release_ms),
            ("stereo_width_percent", self.stereo_width_percent),
            ("target_lufs", self.target_lufs),
        ];
        if let Some(band) = &self.eq.low_shelf {
            fields.push(("eq.low_shelf.freq_hz", band.freq_hz));
            fields.push(("eq.low_shelf.gain_db", band.gain_db));
        }
        if let Some(band) = &self.eq.peak {
            fields.push(("eq.peak.freq_hz", band.freq_hz));
            fields.push(("eq.peak.gain_db", band.gain_db));
            fields.push(("eq.peak.q", band.q));
        }
        if let Some(band) = &self.eq.high_shelf {
            fields.push(("eq.high_shelf.freq_hz", band.freq_hz));
            fields.push(("eq.high_shelf.gain_db", band.gain_db));
        }
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(format!("{name} is not finite"));
            }
        }
        if self.compression.threshold_db >= 0.0 {
            return Err("compression threshold must be negative".into());
        }
        if self.limiting.threshold_db >= 0.0 {
            return Err("limiter threshold must be negative".into());
        }
        if self.compression.ratio < 1.0 {
            return Err("compression ratio must be >= 1".into());
        }
        if !(0.0..=200.0).contains(&self.stereo_width_percent) {
            return Err("stereo width must be within 0..=200 percent".into());
        }
        Ok(())
    }
}

/// How the mastering parameters are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MasterMode {
    #[default]
    Preset,
    Reference,
}

/// Job description accepted from the surrounding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterRequest {
    pub source_file: PathBuf,
    #[serde(default)]
    pub reference_file: Option<PathBuf>,
    pub preset_name: String,
    #[serde(default)]
    pub mode: MasterMode,
    pub output_file: PathBuf,
}

/// Result contract returned to the surrounding service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterOutcome {
    pub session_id: String,
    pub download_handle: PathBuf,
    pub processing_time_seconds: u64,
    pub original_analysis: AudioAnalysis,
    /// Absent when the post-master probe failed; the artifact is still valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_analysis: Option<AudioAnalysis>,
    /// True when any loudness measurement fell back to defaults.
    pub loudness_degraded: bool,
    pub improvements: Improvements,
}

/// Before/after metrics for the result report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvements {
    pub loudness_change_db: f64,
    pub peak_change_db: f64,
    pub format_change: String,
    pub processing_applied: String,
}

/// Job lifecycle states, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Queued,
    Analyzing,
    BuildingChain,
    Processing,
    Limiting,
    Verifying,
    Completed,
    Failed,
}

/// One progress tick. During `Processing`/`Limiting` the percent tracks the
/// engine's elapsed-time markers, capped at 99 until the pass exits.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub state: JobState,
    pub percent: u8,
    pub message: String,
}
