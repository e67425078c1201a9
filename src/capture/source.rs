//! External processes that produce raw chunks.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Parameters shared by every capture source.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Nominal length of each chunk.
    pub segment_duration: Duration,
    pub width: u32,
    pub height: u32,
    /// Target bit rate in bits per second.
    pub bit_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            segment_duration: Duration::from_secs(5),
            width: 640,
            height: 480,
            bit_rate: 4_000_000,
        }
    }
}

/// Builds the command line of a capture process writing chunks to `output_pattern`.
pub trait CaptureSource: Send + Sync {
    fn name(&self) -> &str;

    fn command(&self, output_pattern: &Path, config: &CaptureConfig) -> Command;
}

/// Raspberry Pi camera via `raspivid` in segment mode.
#[derive(Debug, Clone)]
pub struct RaspividSource {
    binary: PathBuf,
}

impl RaspividSource {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("raspivid"),
        }
    }
}

impl Default for RaspividSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for RaspividSource {
    fn name(&self) -> &str {
        "raspivid"
    }

    fn command(&self, output_pattern: &Path, config: &CaptureConfig) -> Command {
        let segment_ms = config.segment_duration.as_millis().to_string();
        let width = config.width.to_string();
        let height = config.height.to_string();
        let bit_rate = config.bit_rate.to_string();

        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "--segment",
            segment_ms.as_str(),
            "--timeout",
            "0",
            "--width",
            width.as_str(),
            "--height",
            height.as_str(),
            "-b",
            bit_rate.as_str(),
            "-o",
        ])
        .arg(output_pattern);
        cmd
    }
}

/// Synthetic test pattern encoded by ffmpeg, for hosts without a camera.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    binary: PathBuf,
}

impl TestPatternSource {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for TestPatternSource {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn command(&self, output_pattern: &Path, config: &CaptureConfig) -> Command {
        let secs = config.segment_duration.as_secs_f64();
        let input = format!("testsrc=size={}x{}:rate=30", config.width, config.height);
        let bit_rate = config.bit_rate.to_string();
        let key_frames = format!("expr:gte(t,n_forced*{})", secs);
        let segment_time = secs.to_string();

        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-re",
            "-f",
            "lavfi",
            "-i",
            input.as_str(),
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-b:v",
            bit_rate.as_str(),
            "-force_key_frames",
            key_frames.as_str(),
            "-f",
            "segment",
            "-segment_time",
            segment_time.as_str(),
            "-segment_format",
            "h264",
        ])
        .arg(output_pattern);
        cmd
    }
}
