//! Filter chain construction
//!
//! Turns a [`MasteringSettings`] plus the source analysis into the engine's
//! filter-graph text. Construction is pure: no I/O, no clock, no randomness,
//! so the same inputs always render the same graph.

use crate::types::{AudioAnalysis, MasteringSettings};

/// Widths this close to 100 percent are treated as a no-op and the stereo
/// stage is dropped entirely.
const WIDTH_DEAD_BAND_PERCENT: f64 = 5.0;

/// One filter invocation in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDirective {
    name: &'static str,
    params: Vec<(&'static str, String)>,
}

impl FilterDirective {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            params: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Render as `name=key=value:key=value`.
    pub fn render(&self) -> String {
        if self.params.is_empty() {
            return self.name.to_string();
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        format!("{}={}", self.name, params.join(":"))
    }
}

/// Join directives into the comma-separated graph text the engine accepts.
pub fn render_chain(directives: &[FilterDirective]) -> String {
    directives
        .iter()
        .map(FilterDirective::render)
        .collect::<Vec<_>>()
        .join(",")
}

/// Format a numeric parameter without trailing zeros (`2.50` -> `2.5`,
/// `10.00` -> `10`).
pub(crate) fn num(value: f64) -> String {
    let mut text = format!("{value:.2}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    text
}

/// Build the full mastering chain for pass one.
///
/// Stage order is fixed: high-pass, tone shaping, compression, optional
/// stereo width, excitation, and exactly one limiter at the end.
pub fn build_chain(settings: &MasteringSettings, analysis: &AudioAnalysis) -> Vec<FilterDirective> {
    let mut chain = Vec::new();

    // Rumble removal ahead of everything else.
    chain.push(
        FilterDirective::new("highpass")
            .arg("f", "20")
            .arg("poles", "2"),
    );

    if let Some(band) = &settings.eq.low_shelf {
        chain.push(
            FilterDirective::new("bass")
                .arg("g", num(band.gain_db))
                .arg("f", num(band.freq_hz))
                .arg("w", "0.5"),
        );
    }
    if let Some(band) = &settings.eq.peak {
        chain.push(
            FilterDirective::new("equalizer")
                .arg("f", num(band.freq_hz))
                .arg("width_type", "q")
                .arg("w", num(band.q))
                .arg("g", num(band.gain_db)),
        );
    }
    if let Some(band) = &settings.eq.high_shelf {
        chain.push(
            FilterDirective::new("treble")
                .arg("g", num(band.gain_db))
                .arg("f", num(band.freq_hz))
                .arg("w", "0.5"),
        );
    }

    chain.push(
        FilterDirective::new("acompressor")
            .arg("threshold", format!("{}dB", num(settings.compression.threshold_db)))
            .arg("ratio", num(settings.compression.ratio))
            .arg("attack", num(settings.compression.attack_ms))
            .arg("release", num(settings.compression.release_ms))
            .arg("makeup", "2dB")
            .arg("knee", "2")
            .arg("detection", "peak"),
    );

    // Width is only meaningful on stereo material and only outside the
    // dead band around 100 percent.
    let width_offset = (settings.stereo_width_percent - 100.0) / 100.0;
    if analysis.channels == 2 && width_offset.abs() > WIDTH_DEAD_BAND_PERCENT / 100.0 {
        chain.push(
            FilterDirective::new("extrastereo")
                .arg("m", num(width_offset.clamp(-1.0, 1.0)))
                .arg("c", "false"),
        );
    }

    chain.push(
        FilterDirective::new("aexciter")
            .arg("level_in", "1")
            .arg("level_out", "1")
            .arg("amount", "1")
            .arg("drive", "8.5")
            .arg("blend", "0.8")
            .arg("freq", "7500")
            .arg("ceil", "16000")
            .arg("listen", "0"),
    );

    let makeup_db = (settings.target_lufs - analysis.mean_volume_db + 6.0).clamp(-12.0, 12.0);
    chain.push(limiter(
        makeup_db,
        settings.limiting.threshold_db,
        settings.limiting.release_ms,
    ));

    chain
}

/// The single limiter stage closing every chain.
pub(crate) fn limiter(level_in_db: f64, ceiling_db: f64, release_ms: f64) -> FilterDirective {
    FilterDirective::new("alimiter")
        .arg("level_in", format!("{}dB", num(level_in_db)))
        .arg("level_out", format!("{}dB", num(ceiling_db)))
        .arg("limit", format!("{}dB", num(ceiling_db)))
        .arg("attack", "0.5")
        .arg("release", num(release_ms))
        .arg("asc", "1")
}
