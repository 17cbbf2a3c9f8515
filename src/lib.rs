//! FFmpeg-backed two-pass audio mastering pipeline
//!
//! A job probes the source, measures loudness, resolves mastering parameters
//! from a preset catalog or a reference track, renders a filter chain, and
//! runs two engine passes: the mastering chain into a temporary file, then
//! measured loudness normalization plus a final limiter into the output.

pub mod chain;
pub mod decode;
pub mod engine;
pub mod error;
pub mod locator;
pub mod loudness;
pub mod presets;
pub mod probe;
pub mod reference;
pub mod spectral;
pub mod types;

pub use engine::{MasterJob, MasteringEngine};
pub use error::MasterError;
pub use locator::EngineLocator;
pub use types::{
    AudioAnalysis, MasterMode, MasterOutcome, MasterRequest, MasteringSettings, ProgressUpdate,
};
