pub mod chunks;
pub mod errors;
pub mod ffmpeg;
pub mod monitor;
pub mod source;
pub mod state;

use std::path::Path;

use chrono::{DateTime, Utc};

pub use errors::CaptureError;
pub use ffmpeg::{FfmpegRemuxer, Remuxer};
pub use monitor::{CaptureMonitor, ChunkDrainer, MonitorConfig};
pub use source::{CaptureConfig, CaptureSource, RaspividSource, TestPatternSource};
pub use state::MonitorState;

/// Receives every converted chunk exactly once, synchronously from the drain loop.
///
/// `path` is only valid for the duration of the call: the file is deleted
/// once all subscribers have returned.
pub trait Subscriber: Send + Sync {
    fn video_recorded(&self, path: &Path, created_at: DateTime<Utc>, modified_at: DateTime<Utc>);
}
