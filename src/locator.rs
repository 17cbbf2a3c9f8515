//! Locating and validating the external processing engine
//!
//! The engine's executables are resolved once, at construction time, and the
//! resulting [`EngineLocator`] is injected into everything that spawns a
//! process. Env overrides win, then `PATH`, then the usual install locations.

use std::env;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::error::MasterError;

#[cfg(target_os = "macos")]
const FALLBACK_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];
#[cfg(all(unix, not(target_os = "macos")))]
const FALLBACK_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin"];
#[cfg(windows)]
const FALLBACK_DIRS: &[&str] = &["C:\\ffmpeg\\bin"];

/// Resolved executable paths for the external processing engine.
#[derive(Debug, Clone)]
pub struct EngineLocator {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl EngineLocator {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Resolve the engine executables. `FFMPEG_PATH`/`FFPROBE_PATH` override
    /// the search for their respective binary.
    pub fn discover() -> Result<Self, MasterError> {
        let ffmpeg = match env::var_os("FFMPEG_PATH") {
            Some(path) => PathBuf::from(path),
            None => find_executable("ffmpeg").ok_or(MasterError::EngineNotFound)?,
        };
        let ffprobe = match env::var_os("FFPROBE_PATH") {
            Some(path) => PathBuf::from(path),
            None => find_executable("ffprobe").ok_or(MasterError::EngineNotFound)?,
        };
        debug!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "engine located");
        Ok(Self { ffmpeg, ffprobe })
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe(&self) -> &Path {
        &self.ffprobe
    }

    /// Run both executables with `-version` and confirm they identify
    /// themselves as the expected tools.
    pub async fn validate(&self) -> Result<(), MasterError> {
        check_version(&self.ffmpeg, "ffmpeg").await?;
        check_version(&self.ffprobe, "ffprobe").await
    }
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let filename = exe_name(name);
    if let Some(path_var) = env::var_os("PATH") {
        for dir in env::split_paths(&path_var) {
            let candidate = dir.join(&filename);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    for dir in FALLBACK_DIRS {
        let candidate = Path::new(dir).join(&filename);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(windows)]
fn exe_name(name: &str) -> String {
    format!("{name}.exe")
}

#[cfg(not(windows))]
fn exe_name(name: &str) -> String {
    name.to_string()
}

async fn check_version(path: &Path, name: &str) -> Result<(), MasterError> {
    let output = Command::new(path)
        .arg("-version")
        .output()
        .await
        .map_err(|e| MasterError::Engine {
            stage: "validate",
            code: None,
            stderr_tail: format!("{}: {e}", path.display()),
        })?;
    let banner = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() || !banner.contains(&format!("{name} version")) {
        return Err(MasterError::Engine {
            stage: "validate",
            code: output.status.code(),
            stderr_tail: format!("{} did not identify as {name}", path.display()),
        });
    }
    Ok(())
}
