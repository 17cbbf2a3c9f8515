//! End-to-end pipeline tests against stand-in engine executables
//!
//! Each test builds a pair of shell scripts that mimic the engine's probe,
//! measurement and transform behavior, so the full job lifecycle runs
//! without real media or a real engine install.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use worker_master::loudness::measure_loudness;
use worker_master::types::{JobState, LoudnessMeasurement, MasterMode};
use worker_master::{EngineLocator, MasterError, MasterJob, MasterRequest, MasteringEngine};

const PROBE_SCRIPT: &str = r#"#!/bin/sh
cat <<'EOF'
{
  "streams": [
    {"codec_type": "audio", "codec_name": "mp3", "sample_rate": "44100",
     "channels": 2, "duration": "2.0", "bit_rate": "192000"}
  ],
  "format": {"format_name": "mp3", "duration": "2.0", "bit_rate": "192000"}
}
EOF
"#;

const MEASURE_BRANCHES: &str = r#"args="$*"
echo "$args" >> "${0%/*}/ffmpeg_args.log"
case "$args" in
  *"-f null"*)
    case "$args" in
      *loudnorm*)
        echo '{ "input_i" : "-17.8", "input_tp" : "-0.9", "input_lra" : "6.0", "input_thresh" : "-28.0" }' >&2
        ;;
      *)
        echo "mean_volume: -18.0 dB" >&2
        echo "max_volume: -2.0 dB" >&2
        ;;
    esac
    exit 0
    ;;
esac
for out in "$@"; do :; done
"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Build a fake engine whose measurement passes always succeed and whose
/// transform pass runs `transform_body` with `$out` bound to the output path.
fn fake_engine(dir: &TempDir, transform_body: &str) -> EngineLocator {
    let ffprobe = dir.path().join("ffprobe");
    write_script(&ffprobe, PROBE_SCRIPT);

    let ffmpeg = dir.path().join("ffmpeg");
    write_script(
        &ffmpeg,
        &format!("#!/bin/sh\n{MEASURE_BRANCHES}{transform_body}\n"),
    );

    EngineLocator::new(ffmpeg, ffprobe)
}

fn request(dir: &TempDir) -> (MasterRequest, PathBuf) {
    let source = dir.path().join("in.mp3");
    fs::write(&source, b"not really audio").unwrap();
    let output = dir.path().join("out.wav");
    (
        MasterRequest {
            source_file: source,
            reference_file: None,
            preset_name: "Pop".to_string(),
            mode: MasterMode::Preset,
            output_file: output.clone(),
        },
        output,
    )
}

#[tokio::test]
async fn preset_job_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(&dir, r#"printf 'mastered audio' > "$out""#);
    let (request, output) = request(&dir);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = MasteringEngine::new(locator);
    let outcome = engine
        .run(MasterJob::new(request).with_progress(tx))
        .await
        .unwrap();

    assert_eq!(outcome.download_handle, output);
    assert!(fs::metadata(&output).unwrap().len() > 0);
    assert!(!outcome.loudness_degraded);
    assert!(outcome.processed_analysis.is_some());
    assert_eq!(outcome.improvements.processing_applied, "Pop preset");
    assert_eq!(outcome.improvements.format_change, "mp3 -> mp3");

    let mut states = Vec::new();
    while let Ok(update) = rx.try_recv() {
        states.push(update.state);
    }
    assert_eq!(states.first(), Some(&JobState::Queued));
    assert_eq!(states.last(), Some(&JobState::Completed));
    assert!(states.contains(&JobState::Processing));
    assert!(states.contains(&JobState::Limiting));
    assert!(states.contains(&JobState::Verifying));
}

#[tokio::test]
async fn reference_mode_matches_the_reference() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(&dir, r#"printf 'mastered audio' > "$out""#);
    let (mut request, _) = request(&dir);

    let reference = dir.path().join("ref.mp3");
    fs::write(&reference, b"not really audio either").unwrap();
    request.reference_file = Some(reference);
    request.mode = MasterMode::Reference;

    let engine = MasteringEngine::new(locator);
    let outcome = engine.run(MasterJob::new(request)).await.unwrap();
    assert_eq!(outcome.improvements.processing_applied, "reference match");
}

#[tokio::test]
async fn reference_mode_without_a_reference_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(&dir, r#"printf 'mastered audio' > "$out""#);
    let (mut request, output) = request(&dir);
    request.mode = MasterMode::Reference;

    let engine = MasteringEngine::new(locator);
    let err = engine.run(MasterJob::new(request)).await.unwrap_err();
    assert!(matches!(err, MasterError::MissingReference));
    assert!(!output.exists());
}

#[tokio::test]
async fn unknown_preset_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(&dir, r#"printf 'mastered audio' > "$out""#);
    let (mut request, _) = request(&dir);
    request.preset_name = "Vaporwave".to_string();

    let engine = MasteringEngine::new(locator);
    let err = engine.run(MasterJob::new(request)).await.unwrap_err();
    assert!(matches!(err, MasterError::UnknownPreset(_)));
}

#[tokio::test]
async fn failed_pass_surfaces_diagnostics_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(
        &dir,
        "echo 'Error while filtering: invalid argument' >&2\nexit 1",
    );
    let (request, output) = request(&dir);

    let job = MasterJob::new(request);
    let job_id = job.id.clone();
    let engine = MasteringEngine::new(locator);
    let err = engine.run(job).await.unwrap_err();

    match err {
        MasterError::Engine {
            stage,
            code,
            stderr_tail,
        } => {
            assert_eq!(stage, "processing");
            assert_eq!(code, Some(1));
            assert!(stderr_tail.contains("invalid argument"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());

    // The per-job scratch directory must be gone.
    let prefix = format!("master_{job_id}_");
    let leftovers = fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .count();
    assert_eq!(leftovers, 0);
}

/// A fake engine whose loudness scan always exits non-zero; volume scans and
/// transform passes still succeed.
fn engine_with_broken_loudness_scan(dir: &TempDir) -> EngineLocator {
    let ffprobe = dir.path().join("ffprobe");
    write_script(&ffprobe, PROBE_SCRIPT);

    let ffmpeg = dir.path().join("ffmpeg");
    write_script(
        &ffmpeg,
        r#"#!/bin/sh
args="$*"
case "$args" in
  *"-f null"*)
    case "$args" in
      *loudnorm*)
        echo 'Error opening filters!' >&2
        exit 1
        ;;
      *)
        echo "mean_volume: -18.0 dB" >&2
        echo "max_volume: -2.0 dB" >&2
        exit 0
        ;;
    esac
    ;;
esac
for out in "$@"; do :; done
printf 'mastered audio' > "$out"
"#,
    );

    EngineLocator::new(ffmpeg, ffprobe)
}

#[tokio::test]
async fn failed_loudness_scan_degrades_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let locator = engine_with_broken_loudness_scan(&dir);
    let (request, _) = request(&dir);

    // The scan itself never errors, it substitutes the fixed record.
    let measurement = measure_loudness(&locator, &request.source_file).await;
    assert_eq!(measurement, LoudnessMeasurement::fallback());
    assert!(measurement.degraded);

    // The job still completes; the degradation is only flagged.
    let engine = MasteringEngine::new(locator);
    let outcome = engine.run(MasterJob::new(request)).await.unwrap();
    assert!(outcome.loudness_degraded);
    assert!(outcome.processed_analysis.is_some());
}

#[tokio::test]
async fn transform_passes_filter_audio_streams_only() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(&dir, r#"printf 'mastered audio' > "$out""#);
    let (request, _) = request(&dir);

    let engine = MasteringEngine::new(locator);
    engine.run(MasterJob::new(request)).await.unwrap();

    let log = fs::read_to_string(dir.path().join("ffmpeg_args.log")).unwrap();
    let transforms: Vec<&str> = log
        .lines()
        .filter(|line| !line.contains("-f null"))
        .collect();
    assert_eq!(transforms.len(), 2);
    for line in transforms {
        assert!(line.contains("-map 0:a"), "{line}");
        assert!(line.contains("-filter:a"), "{line}");
        assert!(!line.contains("-filter_complex"), "{line}");
    }
}

#[tokio::test]
async fn empty_output_fails_verification() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(&dir, r#": > "$out""#);
    let (request, output) = request(&dir);

    let engine = MasteringEngine::new(locator);
    let err = engine.run(MasterJob::new(request)).await.unwrap_err();
    assert!(matches!(err, MasterError::EmptyOutput(_)));
    assert!(!output.exists());
}

#[tokio::test]
async fn cancellation_kills_a_running_pass() {
    let dir = tempfile::tempdir().unwrap();
    let locator = fake_engine(&dir, "sleep 30");
    let (request, output) = request(&dir);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let engine = MasteringEngine::new(locator);
    let job = MasterJob::new(request).with_cancel(cancel_rx);

    let handle = tokio::spawn(async move { engine.run(job).await });
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    cancel_tx.send(true).unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, MasterError::Cancelled("processing")));
    assert!(!output.exists());
}
