//! Live HLS manifest generation.
//!
//! Pure functions only: the caller picks the window with
//! `SegmentStore::latest_segments(window_len(..))` and renders it here.

use std::fmt::Write;
use std::time::Duration;

use crate::segments::Segment;

/// Smallest window handed to players, whatever the duration math says.
pub const MIN_WINDOW_SEGMENTS: usize = 3;

/// Path prefix under which the HTTP shell serves segment files.
pub const SEGMENT_URI_PREFIX: &str = "segments/";

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Hls,
    /// Same body, served as text for debugging in a browser.
    PlainText,
}

impl ManifestFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ManifestFormat::Hls => HLS_CONTENT_TYPE,
            ManifestFormat::PlainText => TEXT_CONTENT_TYPE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub content_type: &'static str,
    pub body: String,
}

/// Number of segments needed to cover `live_window`, never fewer than three.
pub fn window_len(live_window: Duration, segment_duration: Duration) -> usize {
    if segment_duration.is_zero() {
        return MIN_WINDOW_SEGMENTS;
    }

    let fits = (live_window.as_nanos() / segment_duration.as_nanos()) as usize;
    fits.max(MIN_WINDOW_SEGMENTS)
}

/// Renders `segments` (ascending by id) as a live playlist.
///
/// A gap in the ids puts `#EXT-X-DISCONTINUITY` before the first segment
/// after the gap. An empty window is still a valid manifest with media
/// sequence 0.
pub fn generate(segments: &[Segment], format: ManifestFormat) -> Manifest {
    let target_duration = segments
        .iter()
        .map(|s| s.duration)
        .max()
        .unwrap_or_default()
        .as_secs();
    let first_id = segments.first().map(|s| s.id).unwrap_or(0);

    let mut body = String::new();
    body.push_str("#EXTM3U\n");
    let _ = writeln!(body, "#EXT-X-TARGETDURATION:{}", target_duration);
    let _ = writeln!(body, "#EXT-X-MEDIA-SEQUENCE:{}", first_id);

    let mut prev_id = first_id.wrapping_sub(1);
    for segment in segments {
        if segment.id != prev_id.wrapping_add(1) {
            body.push_str("#EXT-X-DISCONTINUITY\n");
        }

        let _ = writeln!(body, "#EXTINF:{:.6},", segment.duration.as_secs_f64());
        let _ = writeln!(body, "{}{}", SEGMENT_URI_PREFIX, segment.name);

        prev_id = segment.id;
    }

    Manifest {
        content_type: format.content_type(),
        body,
    }
}
