//! The mastering engine: job lifecycle and the two-pass pipeline
//!
//! Pass one applies the full mastering chain into a temporary file. The pass
//! output is then re-measured and pass two runs a loudness normalizer fed
//! with the real measured values, followed by the final ceiling limiter, into
//! the caller's output path. Temporary files live in a per-job directory that
//! is removed when the job ends, success or not.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::chain::{build_chain, limiter, num, render_chain, FilterDirective};
use crate::error::MasterError;
use crate::locator::EngineLocator;
use crate::loudness::{measure_loudness, measure_volume};
use crate::presets;
use crate::probe;
use crate::reference::{analyze_reference, reference_chain};
use crate::types::{
    AudioAnalysis, Improvements, JobState, LoudnessMeasurement, MasterMode, MasterOutcome,
    MasterRequest, ProgressUpdate,
};

const OUTPUT_CODEC: &str = "pcm_s24le";
const OUTPUT_SAMPLE_RATE: &str = "48000";
const STDERR_TAIL_LINES: usize = 12;

/// One mastering job: the request plus optional progress and cancellation
/// hooks.
pub struct MasterJob {
    pub id: String,
    pub request: MasterRequest,
    progress: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl MasterJob {
    pub fn new(request: MasterRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            progress: None,
            cancel: None,
        }
    }

    /// Receive a progress update per state change and per engine time marker.
    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Cancel the job by sending `true` on the paired watch channel.
    pub fn with_cancel(mut self, receiver: watch::Receiver<bool>) -> Self {
        self.cancel = Some(receiver);
        self
    }
}

/// Second-pass targets, fixed once the chain is resolved.
#[derive(Debug, Clone, Copy)]
struct LimitTarget {
    target_lufs: f64,
    ceiling_db: f64,
    release_ms: f64,
}

pub struct MasteringEngine {
    locator: EngineLocator,
}

impl MasteringEngine {
    pub fn new(locator: EngineLocator) -> Self {
        Self { locator }
    }

    /// Run a job to completion.
    ///
    /// On failure the partial output file is removed and a `Failed` progress
    /// update carries the error text.
    pub async fn run(&self, job: MasterJob) -> Result<MasterOutcome, MasterError> {
        let output_file = job.request.output_file.clone();
        let progress = job.progress.clone();
        match self.run_inner(job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "mastering job failed");
                report(&progress, JobState::Failed, 0, e.to_string());
                let _ = tokio::fs::remove_file(&output_file).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self, job: MasterJob) -> Result<MasterOutcome, MasterError> {
        let MasterJob {
            id,
            request,
            progress,
            mut cancel,
        } = job;
        let started = Instant::now();
        info!(job = %id, source = %request.source_file.display(), "job accepted");
        report(&progress, JobState::Queued, 0, "queued");

        report(&progress, JobState::Analyzing, 5, "analyzing source");
        let mut analysis = probe::probe(&self.locator, &request.source_file).await?;
        analysis.apply_volume(measure_volume(&self.locator, &request.source_file).await);
        let source_loudness = measure_loudness(&self.locator, &request.source_file).await;
        if source_loudness.degraded {
            warn!(job = %id, "source loudness degraded to defaults");
        }
        analysis.loudness = Some(source_loudness);

        report(&progress, JobState::BuildingChain, 20, "resolving parameters");
        let (chain, target, applied) = self.resolve_chain(&request, &analysis).await?;
        let graph = render_chain(&chain);
        debug!(job = %id, graph = %graph, "chain built");

        let workspace = tempfile::Builder::new()
            .prefix(&format!("master_{id}_"))
            .tempdir()?;
        let intermediate = workspace.path().join("pass1.wav");

        self.run_engine_pass(
            "processing",
            JobState::Processing,
            &request.source_file,
            &graph,
            &intermediate,
            analysis.duration_secs,
            &progress,
            &mut cancel,
        )
        .await?;

        // Normalize against what pass one actually produced, not the source.
        let measured = measure_loudness(&self.locator, &intermediate).await;
        let limit_graph = render_chain(&limiting_chain(target, &measured));
        debug!(job = %id, graph = %limit_graph, "limiting chain built");

        self.run_engine_pass(
            "limiting",
            JobState::Limiting,
            &intermediate,
            &limit_graph,
            &request.output_file,
            analysis.duration_secs,
            &progress,
            &mut cancel,
        )
        .await?;

        report(&progress, JobState::Verifying, 98, "verifying output");
        verify_output(&request.output_file).await?;

        // Post-master metrics are best-effort; the artifact is already valid.
        let processed = match probe::probe(&self.locator, &request.output_file).await {
            Ok(mut p) => {
                p.apply_volume(measure_volume(&self.locator, &request.output_file).await);
                Some(p)
            }
            Err(e) => {
                warn!(job = %id, error = %e, "post-master probe failed");
                None
            }
        };

        let improvements = improvements(&analysis, processed.as_ref(), &applied);
        let outcome = MasterOutcome {
            session_id: id.clone(),
            download_handle: request.output_file.clone(),
            processing_time_seconds: started.elapsed().as_secs(),
            loudness_degraded: source_loudness.degraded || measured.degraded,
            original_analysis: analysis,
            processed_analysis: processed,
            improvements,
        };

        report(&progress, JobState::Completed, 100, "mastering complete");
        info!(job = %id, secs = outcome.processing_time_seconds, "job completed");
        Ok(outcome)
    }

    /// Resolve the pass-one chain and the pass-two targets from the request.
    async fn resolve_chain(
        &self,
        request: &MasterRequest,
        analysis: &AudioAnalysis,
    ) -> Result<(Vec<FilterDirective>, LimitTarget, String), MasterError> {
        match request.mode {
            MasterMode::Preset => {
                let mut settings = presets::resolve(&request.preset_name)?;
                let mut applied = format!("{} preset", request.preset_name);
                if let Some(reference) = &request.reference_file {
                    let profile = analyze_reference(&self.locator, reference).await?;
                    settings = presets::resolve_from_reference(
                        settings,
                        &profile.loudness,
                        &profile.spectrum,
                    );
                    applied.push_str(", adapted to reference");
                }
                let target = LimitTarget {
                    target_lufs: settings.target_lufs,
                    ceiling_db: settings.limiting.threshold_db,
                    release_ms: settings.limiting.release_ms,
                };
                Ok((build_chain(&settings, analysis), target, applied))
            }
            MasterMode::Reference => {
                let reference = request
                    .reference_file
                    .as_ref()
                    .ok_or(MasterError::MissingReference)?;
                let profile = analyze_reference(&self.locator, reference).await?;
                let target = LimitTarget {
                    target_lufs: profile.loudness.integrated_lufs,
                    ceiling_db: (profile.loudness.true_peak_db + 0.1).clamp(-1.0, -0.1),
                    release_ms: 50.0,
                };
                Ok((reference_chain(), target, "reference match".to_string()))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_engine_pass(
        &self,
        stage: &'static str,
        state: JobState,
        input: &Path,
        graph: &str,
        output: &Path,
        duration_secs: f64,
        progress: &Option<mpsc::UnboundedSender<ProgressUpdate>>,
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> Result<(), MasterError> {
        report(progress, state, 0, stage);
        // Audio-only mapping: sources with attached-picture streams would
        // otherwise drag a video stream into the WAV output.
        let mut child = Command::new(self.locator.ffmpeg())
            .arg("-i")
            .arg(input)
            .args(["-map", "0:a", "-filter:a", graph])
            .args(["-acodec", OUTPUT_CODEC, "-ar", OUTPUT_SAMPLE_RATE, "-y"])
            .arg(output)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // The stderr pipe must be drained or a chatty pass can stall on
        // backpressure.
        let stderr = child.stderr.take();
        let mut lines = stderr.map(|s| BufReader::new(s).lines());
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let deadline = tokio::time::Instant::now() + pass_timeout(duration_secs);

        loop {
            let next_line = async {
                match &mut lines {
                    Some(lines) => lines.next_line().await,
                    None => Ok(None),
                }
            };
            tokio::select! {
                line = next_line => match line {
                    Ok(Some(line)) => {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        if let Some(elapsed) = parse_time_marker(&line) {
                            let percent = pass_percent(elapsed, duration_secs);
                            report(progress, state, percent, stage);
                        }
                        tail.push_back(line);
                    }
                    Ok(None) | Err(_) => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = child.kill().await;
                    return Err(MasterError::Timeout {
                        stage,
                        limit: pass_timeout(duration_secs),
                    });
                }
                _ = cancelled(cancel) => {
                    let _ = child.kill().await;
                    return Err(MasterError::Cancelled(stage));
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = tokio::time::sleep_until(deadline) => {
                let _ = child.kill().await;
                return Err(MasterError::Timeout {
                    stage,
                    limit: pass_timeout(duration_secs),
                });
            }
            _ = cancelled(cancel) => {
                let _ = child.kill().await;
                return Err(MasterError::Cancelled(stage));
            }
        };
        if !status.success() {
            return Err(MasterError::Engine {
                stage,
                code: status.code(),
                stderr_tail: tail.make_contiguous().join("\n"),
            });
        }
        Ok(())
    }
}

/// The pass-two graph: loudness normalization with measured inputs, then the
/// final ceiling limiter.
fn limiting_chain(target: LimitTarget, measured: &LoudnessMeasurement) -> Vec<FilterDirective> {
    vec![
        FilterDirective::new("loudnorm")
            .arg("I", num(target.target_lufs))
            .arg("TP", num(target.ceiling_db))
            .arg("LRA", "7")
            .arg("measured_I", num(measured.integrated_lufs))
            .arg("measured_LRA", num(measured.loudness_range))
            .arg("measured_TP", num(measured.true_peak_db))
            .arg("measured_thresh", num(measured.threshold_db))
            .arg("linear", "true"),
        limiter(0.0, target.ceiling_db, target.release_ms),
    ]
}

/// Resolves when cancellation is requested; pends forever when no channel is
/// attached or the sender is gone.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(receiver) => loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        },
        None => std::future::pending().await,
    }
}

fn report(
    progress: &Option<mpsc::UnboundedSender<ProgressUpdate>>,
    state: JobState,
    percent: u8,
    message: impl Into<String>,
) {
    let update = ProgressUpdate {
        state,
        percent,
        message: message.into(),
    };
    debug!(state = ?update.state, percent = update.percent, "{}", update.message);
    if let Some(sender) = progress {
        let _ = sender.send(update);
    }
}

/// Extract elapsed seconds from an engine `time=HH:MM:SS.ss` marker.
fn parse_time_marker(line: &str) -> Option<f64> {
    let idx = line.find("time=")?;
    let token: String = line[idx + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ':' || *c == '.')
        .collect();
    let mut parts = token.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Pass-local percent, capped at 99 until the pass actually exits.
fn pass_percent(elapsed_secs: f64, duration_secs: f64) -> u8 {
    if duration_secs <= 0.0 {
        return 0;
    }
    ((elapsed_secs / duration_secs) * 100.0).clamp(0.0, 99.0) as u8
}

/// Wall-clock budget for one pass: a minute of slack plus four times the
/// material, never more than an hour.
fn pass_timeout(duration_secs: f64) -> Duration {
    let secs = (60.0 + 4.0 * duration_secs.max(0.0)).min(3600.0);
    Duration::from_secs_f64(secs)
}

/// An engine pass that exits cleanly can still produce nothing.
async fn verify_output(path: &Path) -> Result<(), MasterError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(MasterError::EmptyOutput(path.to_path_buf())),
        Err(_) => Err(MasterError::EmptyOutput(path.to_path_buf())),
    }
}

fn improvements(
    original: &AudioAnalysis,
    processed: Option<&AudioAnalysis>,
    applied: &str,
) -> Improvements {
    let (loudness_change_db, peak_change_db, out_format) = match processed {
        Some(p) => (
            p.mean_volume_db - original.mean_volume_db,
            p.max_volume_db - original.max_volume_db,
            p.format.clone(),
        ),
        None => (0.0, 0.0, OUTPUT_CODEC.to_string()),
    };
    Improvements {
        loudness_change_db,
        peak_change_db,
        format_change: format!("{} -> {}", original.format, out_format),
        processing_applied: applied.to_string(),
    }
}
