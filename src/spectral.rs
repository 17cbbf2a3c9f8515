//! Deterministic spectral estimation for reference tracks
//!
//! Estimates how a reference distributes energy across bass, mid and treble
//! bands, plus its stereo width, from decoded samples. The estimate drives
//! the reference resolver's EQ and width adjustments.

use std::path::Path;

use anyhow::{ensure, Result};
use realfft::RealFftPlanner;

use crate::decode::{read_audio_file, ChannelBuffer};
use crate::types::SpectralEstimate;

const FFT_SIZE: usize = 4096;
const BASS_CUTOFF_HZ: f64 = 250.0;
const TREBLE_CUTOFF_HZ: f64 = 4000.0;

/// Decode a file and estimate its spectral balance and width.
pub fn estimate_spectrum(path: &Path) -> Result<SpectralEstimate> {
    let buffer = read_audio_file(path)?;
    estimate_from_buffer(&buffer)
}

/// Estimate from already-decoded samples.
pub fn estimate_from_buffer(buffer: &ChannelBuffer) -> Result<SpectralEstimate> {
    ensure!(
        buffer.frame_count() >= FFT_SIZE,
        "reference too short for spectral analysis ({} frames)",
        buffer.frame_count()
    );

    let (bass, mid, treble) = band_energies(buffer)?;
    let total = bass + mid + treble;
    ensure!(total > 0.0, "reference is silent");

    Ok(SpectralEstimate {
        bass_energy: bass / total,
        mid_energy: mid / total,
        treble_energy: treble / total,
        stereo_width: stereo_width(buffer),
    })
}

/// Averaged Hann-windowed STFT power, split at the band cutoffs.
fn band_energies(buffer: &ChannelBuffer) -> Result<(f64, f64, f64)> {
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);

    // Mono mix for the band split.
    let mono: Vec<f32> = (0..buffer.frame_count())
        .map(|i| {
            let sum: f32 = buffer
                .samples
                .iter()
                .map(|ch| ch.get(i).unwrap_or(&0.0))
                .sum();
            sum / buffer.channels as f32
        })
        .collect();

    let hop_size = FFT_SIZE / 2;
    let num_windows = (mono.len() - FFT_SIZE) / hop_size + 1;

    let mut avg_power = vec![0.0f64; FFT_SIZE / 2 + 1];

    for window_idx in 0..num_windows {
        let start = window_idx * hop_size;
        let mut input: Vec<f32> = mono[start..start + FFT_SIZE].to_vec();

        for (i, sample) in input.iter_mut().enumerate() {
            let window =
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos());
            *sample *= window;
        }

        let mut spectrum = fft.make_output_vec();
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| anyhow::anyhow!("fft failed: {e}"))?;

        for (i, c) in spectrum.iter().enumerate() {
            avg_power[i] += (c.re * c.re + c.im * c.im) as f64;
        }
    }

    for power in &mut avg_power {
        *power /= num_windows as f64;
    }

    let freq_resolution = buffer.sample_rate as f64 / FFT_SIZE as f64;
    let mut bass = 0.0;
    let mut mid = 0.0;
    let mut treble = 0.0;

    for (i, &power) in avg_power.iter().enumerate() {
        let freq = i as f64 * freq_resolution;
        if freq < BASS_CUTOFF_HZ {
            bass += power;
        } else if freq < TREBLE_CUTOFF_HZ {
            mid += power;
        } else {
            treble += power;
        }
    }

    Ok((bass, mid, treble))
}

/// Mid/side energy ratio mapped onto the 0.8..1.5 width scale.
///
/// Mono and silent material come out at 1.0 (no width change); identical
/// left/right channels (no side energy) land at the bottom of the scale.
fn stereo_width(buffer: &ChannelBuffer) -> f64 {
    if buffer.channels < 2 {
        return 1.0;
    }

    let left = &buffer.samples[0];
    let right = &buffer.samples[1];
    let len = left.len().min(right.len());

    let mut mid_energy: f64 = 0.0;
    let mut side_energy: f64 = 0.0;
    for i in 0..len {
        let l = left[i] as f64;
        let r = right[i] as f64;
        let mid = (l + r) / 2.0;
        let side = (l - r) / 2.0;
        mid_energy += mid * mid;
        side_energy += side * side;
    }

    if mid_energy + side_energy == 0.0 {
        return 1.0;
    }

    let side_ratio = side_energy / (mid_energy + side_energy);
    0.8 + (2.0 * side_ratio).clamp(0.0, 1.0) * 0.7
}
