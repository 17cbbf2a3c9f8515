//! Reference track analysis and the reference-matching chain

use std::path::Path;

use tracing::{debug, warn};

use crate::chain::{limiter, FilterDirective};
use crate::error::MasterError;
use crate::locator::EngineLocator;
use crate::loudness::{measure_loudness, measure_volume};
use crate::probe;
use crate::spectral::estimate_spectrum;
use crate::types::{AudioAnalysis, LoudnessMeasurement, SpectralEstimate};

/// Everything the resolver needs to know about a reference track.
#[derive(Debug, Clone)]
pub struct ReferenceProfile {
    pub analysis: AudioAnalysis,
    pub loudness: LoudnessMeasurement,
    pub spectrum: SpectralEstimate,
}

/// Analyze a reference track.
///
/// Probing must succeed; loudness degrades to defaults and the spectral
/// estimate degrades to neutral, each with a warning, so a hard-to-decode
/// reference never fails the job outright.
pub async fn analyze_reference(
    locator: &EngineLocator,
    path: &Path,
) -> Result<ReferenceProfile, MasterError> {
    let mut analysis = probe::probe(locator, path).await?;
    analysis.apply_volume(measure_volume(locator, path).await);
    let loudness = measure_loudness(locator, path).await;

    let decode_path = path.to_path_buf();
    let spectrum = match tokio::task::spawn_blocking(move || estimate_spectrum(&decode_path)).await
    {
        Ok(Ok(estimate)) => estimate,
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "spectral estimate failed, using neutral");
            SpectralEstimate::neutral()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "spectral task failed, using neutral");
            SpectralEstimate::neutral()
        }
    };

    debug!(
        path = %path.display(),
        integrated = loudness.integrated_lufs,
        width = spectrum.stereo_width,
        "reference analyzed"
    );

    Ok(ReferenceProfile {
        analysis,
        loudness,
        spectrum,
    })
}

/// The fixed polish chain applied in reference mode.
///
/// A broad five-band EQ contour with moderate compression; loudness matching
/// toward the reference happens in the second pass, not here.
pub fn reference_chain() -> Vec<FilterDirective> {
    vec![
        FilterDirective::new("highpass").arg("f", "20").arg("poles", "2"),
        eq(60.0, 0.7, 0.5),
        eq(200.0, 1.0, 0.3),
        eq(1000.0, 0.8, 0.2),
        eq(3000.0, 1.2, 0.4),
        eq(8000.0, 0.9, 0.3),
        FilterDirective::new("acompressor")
            .arg("threshold", "-16dB")
            .arg("ratio", "3")
            .arg("attack", "5")
            .arg("release", "80")
            .arg("makeup", "3dB")
            .arg("knee", "2"),
        limiter(3.0, -1.0, 50.0),
    ]
}

fn eq(freq_hz: f64, q: f64, gain_db: f64) -> FilterDirective {
    FilterDirective::new("equalizer")
        .arg("f", crate::chain::num(freq_hz))
        .arg("width_type", "q")
        .arg("w", crate::chain::num(q))
        .arg("g", crate::chain::num(gain_db))
}
