//! Error taxonomy for the mastering pipeline

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Everything that can take a mastering job to the `Failed` state.
///
/// Loudness measurement is deliberately absent: it degrades to documented
/// defaults instead of failing (see the `loudness` module).
#[derive(Debug, Error)]
pub enum MasterError {
    /// The probed file contains no audio stream at all.
    #[error("no audio stream found in {0}")]
    NoAudioStream(PathBuf),

    /// The probe process exited non-zero.
    #[error("probe process exited with status {code:?}: {stderr}")]
    ProbeProcess { code: Option<i32>, stderr: String },

    /// The probe emitted output we could not interpret.
    #[error("failed to parse probe output: {0}")]
    ProbeParse(String),

    /// Caller asked for a preset that is not in the catalog.
    #[error("unknown preset: {0:?}")]
    UnknownPreset(String),

    /// Reference mode was requested without a reference file.
    #[error("reference mode requires a reference file")]
    MissingReference,

    /// An engine pass exited non-zero. Carries the diagnostic tail for
    /// debuggability.
    #[error("engine failed during {stage} (exit status {code:?}): {stderr_tail}")]
    Engine {
        stage: &'static str,
        code: Option<i32>,
        stderr_tail: String,
    },

    /// The engine exited cleanly but produced a missing or zero-byte file.
    #[error("engine produced no usable output at {0}")]
    EmptyOutput(PathBuf),

    /// No usable engine executables were found.
    #[error("engine executable not found; set FFMPEG_PATH/FFPROBE_PATH or install ffmpeg")]
    EngineNotFound,

    /// The job was cancelled while a pass was running.
    #[error("job cancelled during {0}")]
    Cancelled(&'static str),

    /// A pass exceeded its wall-clock budget.
    #[error("engine timed out during {stage} after {limit:?}")]
    Timeout {
        stage: &'static str,
        limit: Duration,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
