//! Preset catalog and reference-based parameter resolution

use crate::error::MasterError;
use crate::types::{
    CompressorSettings, EqSettings, LimiterSettings, LoudnessMeasurement, MasteringSettings,
    PeakBand, ShelfBand, SpectralEstimate,
};

/// Catalog names, matched case-sensitively.
pub const PRESET_NAMES: &[&str] = &[
    "Hip Hop",
    "EDM",
    "Pop",
    "Rock",
    "Jazz",
    "Classical",
    "Lo-Fi",
    "Podcast",
];

/// Look up a preset by exact name.
pub fn resolve(name: &str) -> Result<MasteringSettings, MasterError> {
    // (low shelf, peak, high shelf, compressor, limiter, width %, target LUFS)
    let (low, peak, high, comp, lim, width, target) = match name {
        "Hip Hop" => (
            (80.0, 2.5),
            (2500.0, 1.0, 0.8),
            (10000.0, 1.8),
            (-18.0, 4.0, 3.0, 100.0),
            (-0.1, 50.0),
            115.0,
            -14.0,
        ),
        "EDM" => (
            (50.0, 3.0),
            (4000.0, 1.0, 1.0),
            (12000.0, 2.2),
            (-16.0, 6.0, 0.5, 40.0),
            (-0.1, 10.0),
            130.0,
            -12.0,
        ),
        "Pop" => (
            (100.0, 1.8),
            (3000.0, 2.0, 1.2),
            (8000.0, 2.0),
            (-16.0, 3.5, 5.0, 80.0),
            (-0.1, 30.0),
            110.0,
            -14.0,
        ),
        "Rock" => (
            (60.0, 2.0),
            (1200.0, 1.5, 0.6),
            (6000.0, 1.5),
            (-18.0, 4.5, 1.0, 60.0),
            (-0.1, 20.0),
            120.0,
            -13.0,
        ),
        "Jazz" => (
            (80.0, 1.2),
            (1500.0, 1.0, 0.7),
            (7000.0, 1.0),
            (-24.0, 2.5, 8.0, 120.0),
            (-0.5, 80.0),
            100.0,
            -18.0,
        ),
        "Classical" => (
            (40.0, 0.8),
            (2000.0, 0.5, 0.5),
            (8000.0, 0.5),
            (-28.0, 2.0, 10.0, 200.0),
            (-1.0, 100.0),
            95.0,
            -23.0,
        ),
        "Lo-Fi" => (
            (100.0, 2.8),
            (1200.0, -0.5, 1.0),
            (8000.0, -1.5),
            (-22.0, 3.0, 5.0, 100.0),
            (-0.5, 60.0),
            90.0,
            -16.0,
        ),
        "Podcast" => (
            (100.0, -0.5),
            (3000.0, 2.5, 1.0),
            (8000.0, 2.5),
            (-20.0, 3.0, 2.0, 60.0),
            (-1.0, 50.0),
            80.0,
            -16.0,
        ),
        other => return Err(MasterError::UnknownPreset(other.to_string())),
    };

    Ok(MasteringSettings {
        eq: EqSettings {
            low_shelf: Some(ShelfBand {
                freq_hz: low.0,
                gain_db: low.1,
            }),
            peak: Some(PeakBand {
                freq_hz: peak.0,
                gain_db: peak.1,
                q: peak.2,
            }),
            high_shelf: Some(ShelfBand {
                freq_hz: high.0,
                gain_db: high.1,
            }),
        },
        compression: CompressorSettings {
            threshold_db: comp.0,
            ratio: comp.1,
            attack_ms: comp.2,
            release_ms: comp.3,
        },
        limiting: LimiterSettings {
            threshold_db: lim.0,
            release_ms: lim.1,
        },
        stereo_width_percent: width,
        target_lufs: target,
    })
}

/// Adapt a base parameter set toward a measured reference track.
///
/// Dynamic material (LRA above 10 LU) gets a lower compression threshold so
/// the compressor engages more, and vice versa. EQ gains scale with the
/// reference's band-energy fractions, width follows the reference within the
/// 0.8..1.5 band, and the limiter ceiling sits just above the reference true
/// peak without ever reaching 0 dBFS.
pub fn resolve_from_reference(
    base: MasteringSettings,
    loudness: &LoudnessMeasurement,
    spectrum: &SpectralEstimate,
) -> MasteringSettings {
    let mut settings = base;

    settings.target_lufs = loudness.integrated_lufs;

    let threshold_shift = if loudness.loudness_range > 10.0 {
        -2.0
    } else {
        2.0
    };
    settings.compression.threshold_db += threshold_shift;

    if let Some(band) = settings.eq.low_shelf.as_mut() {
        band.gain_db *= spectrum.bass_energy * 2.0;
    }
    if let Some(band) = settings.eq.high_shelf.as_mut() {
        band.gain_db *= spectrum.treble_energy * 3.0;
    }

    settings.stereo_width_percent = spectrum.stereo_width.clamp(0.8, 1.5) * 100.0;
    settings.limiting.threshold_db = (loudness.true_peak_db + 0.1).clamp(-1.0, -0.1);

    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measured(integrated: f64, lra: f64, tp: f64) -> LoudnessMeasurement {
        LoudnessMeasurement {
            integrated_lufs: integrated,
            loudness_range: lra,
            true_peak_db: tp,
            threshold_db: -30.0,
            degraded: false,
        }
    }

    #[test]
    fn classical_is_the_gentlest_profile() {
        let settings = resolve("Classical").unwrap();
        assert_eq!(settings.target_lufs, -23.0);
        assert_eq!(settings.compression.ratio, 2.0);
        assert_eq!(settings.limiting.threshold_db, -1.0);
        assert!(settings.stereo_width_percent < 100.0);
    }

    #[test]
    fn every_catalog_entry_validates() {
        for name in PRESET_NAMES {
            let settings = resolve(name).unwrap();
            assert!(settings.validate().is_ok(), "{name} failed validation");
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(resolve("Pop").is_ok());
        assert!(matches!(
            resolve("pop"),
            Err(MasterError::UnknownPreset(_))
        ));
        assert!(matches!(
            resolve("Dubstep"),
            Err(MasterError::UnknownPreset(_))
        ));
    }

    #[test]
    fn resolution_is_deterministic() {
        assert_eq!(resolve("EDM").unwrap(), resolve("EDM").unwrap());
    }

    #[test]
    fn dynamic_reference_lowers_the_compression_threshold() {
        let base = resolve("Pop").unwrap();
        let adapted = resolve_from_reference(
            base,
            &measured(-9.0, 14.0, -0.3),
            &SpectralEstimate::neutral(),
        );
        assert_eq!(adapted.compression.threshold_db, -18.0);
        assert_eq!(adapted.target_lufs, -9.0);
    }

    #[test]
    fn compressed_reference_raises_the_compression_threshold() {
        let base = resolve("Pop").unwrap();
        let adapted = resolve_from_reference(
            base,
            &measured(-14.0, 4.0, -1.0),
            &SpectralEstimate::neutral(),
        );
        assert_eq!(adapted.compression.threshold_db, -14.0);
    }

    #[test]
    fn neutral_spectrum_leaves_eq_gains_unchanged() {
        let base = resolve("Rock").unwrap();
        let adapted = resolve_from_reference(
            base,
            &measured(-13.0, 7.0, -1.2),
            &SpectralEstimate::neutral(),
        );
        assert_eq!(adapted.eq.low_shelf, base.eq.low_shelf);
        assert_eq!(adapted.eq.high_shelf, base.eq.high_shelf);
    }

    #[test]
    fn limiter_ceiling_tracks_the_reference_peak_but_stays_below_zero() {
        let base = resolve("Pop").unwrap();

        let hot = resolve_from_reference(
            base,
            &measured(-8.0, 5.0, 0.4),
            &SpectralEstimate::neutral(),
        );
        assert_eq!(hot.limiting.threshold_db, -0.1);

        let quiet = resolve_from_reference(
            base,
            &measured(-20.0, 5.0, -6.0),
            &SpectralEstimate::neutral(),
        );
        assert_eq!(quiet.limiting.threshold_db, -1.0);
    }

    #[test]
    fn width_follows_the_reference_within_bounds() {
        let base = resolve("Podcast").unwrap();
        let wide = SpectralEstimate {
            stereo_width: 2.3,
            ..SpectralEstimate::neutral()
        };
        let adapted = resolve_from_reference(base, &measured(-16.0, 6.0, -1.0), &wide);
        assert_eq!(adapted.stereo_width_percent, 150.0);
    }
}
