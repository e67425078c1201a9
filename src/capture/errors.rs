use thiserror::Error;

/// Errors from the capture process and the chunk conversion pipeline.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture process failed: {0}")]
    Process(String),

    #[error("FFmpeg not found. Please install ffmpeg.")]
    FfmpegNotFound,

    #[error("Conversion failed with exit code {exit_code}: {stderr}")]
    ConversionFailed { exit_code: i32, stderr: String },

    #[error("Capture already in progress")]
    AlreadyRunning,
}

impl CaptureError {
    pub fn process(msg: impl Into<String>) -> Self {
        CaptureError::Process(msg.into())
    }

    /// Returns true if a different capture source might succeed where this one failed.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, CaptureError::Process(_))
    }
}
