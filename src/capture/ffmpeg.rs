use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::errors::CaptureError;
use crate::segments::SEGMENT_EXTENSION;

/// Converts a finished raw chunk into a playable container.
pub trait Remuxer: Send + Sync {
    /// Writes the converted file next to `input` and returns its path.
    fn remux(&self, input: &Path) -> Result<PathBuf, CaptureError>;
}

/// Remuxes with `ffmpeg -codec copy`: streams are copied, never re-encoded.
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    binary: PathBuf,
}

impl FfmpegRemuxer {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegRemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Remuxer for FfmpegRemuxer {
    fn remux(&self, input: &Path) -> Result<PathBuf, CaptureError> {
        let output_path = input.with_extension(SEGMENT_EXTENSION);

        let output = Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .args(["-codec", "copy"])
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CaptureError::FfmpegNotFound,
                _ => CaptureError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(target: "capture", "[REMUX] ffmpeg failed on {:?}: {}", input, stderr);

            if output_path.exists() {
                let _ = std::fs::remove_file(&output_path);
            }

            return Err(CaptureError::ConversionFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(output_path)
    }
}

pub fn check_ffmpeg() -> Result<(), CaptureError> {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|_| CaptureError::FfmpegNotFound)?;
    Ok(())
}
