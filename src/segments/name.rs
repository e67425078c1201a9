//! Canonical segment file names.
//!
//! A stored segment is named `segment_<unixSeconds>_<durationMs>_<id>.<ext>`.
//! The name is both the on-disk identity and the URI handed out in playlists,
//! so the store can rebuild its whole index from a directory listing.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::shared::errors::StoreError;

/// Monotonic segment identity. Zero is never assigned.
pub type SegmentId = u64;

/// Extension of converted segments (MPEG transport stream).
pub const SEGMENT_EXTENSION: &str = "ts";

const NAME_PREFIX: &str = "segment";

/// The three integer fields encoded in a segment file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentName {
    pub created_secs: u64,
    pub duration_ms: u64,
    pub id: SegmentId,
}

impl SegmentName {
    pub fn new(created_at: DateTime<Utc>, duration: Duration, id: SegmentId) -> Self {
        Self {
            created_secs: created_at.timestamp().max(0) as u64,
            duration_ms: duration.as_millis() as u64,
            id,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            NAME_PREFIX, self.created_secs, self.duration_ms, self.id, SEGMENT_EXTENSION
        )
    }

    /// Parses `segment_<time>_<durationMs>_<id>.<ext>`.
    ///
    /// Everything from the first `.` on is ignored, so any extension is accepted.
    pub fn parse(name: &str) -> Result<Self, StoreError> {
        let stem = name.split('.').next().unwrap_or_default();
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() != 4 || parts[0] != NAME_PREFIX {
            return Err(StoreError::parse(name));
        }

        let field = |value: &str, what: &str| {
            value
                .parse::<u64>()
                .map_err(|e| StoreError::parse(format!("{}: bad {}: {}", name, what, e)))
        };

        Ok(Self {
            created_secs: field(parts[1], "time")?,
            duration_ms: field(parts[2], "duration")?,
            id: field(parts[3], "id")?,
        })
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.created_secs).ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// One playable, already-converted unit of recorded video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: SegmentId,
    /// File name inside the store directory; also the playlist URI.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub duration: Duration,
    /// Size in bytes of the stored file.
    pub size: u64,
}

impl Segment {
    pub fn new(id: SegmentId, created_at: DateTime<Utc>, duration: Duration, size: u64) -> Self {
        let name = SegmentName::new(created_at, duration, id).file_name();
        Self {
            id,
            name,
            created_at,
            duration,
            size,
        }
    }

    /// Rebuilds a segment from a directory entry, keeping the name as found on disk.
    ///
    /// A creation time beyond what `DateTime` can hold is clamped, so the id
    /// still counts.
    pub fn from_file_name(name: &str, size: u64) -> Result<Self, StoreError> {
        let parsed = SegmentName::parse(name)?;
        let created_at = parsed.created_at().unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(Self {
            id: parsed.id,
            name: name.to_string(),
            created_at,
            duration: parsed.duration(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        let cases = [(0, 0, 0), (1_528_000_000, 5_000, 1), (u32::MAX as u64, 4_987, 987_654_321)];

        for (created_secs, duration_ms, id) in cases {
            let name = SegmentName {
                created_secs,
                duration_ms,
                id,
            };
            assert_eq!(SegmentName::parse(&name.file_name()).unwrap(), name);
        }
    }

    #[test]
    fn test_file_name_format() {
        let created = Utc.timestamp_opt(1_528_000_123, 0).unwrap();
        let name = SegmentName::new(created, Duration::from_millis(5_200), 42);

        assert_eq!(name.file_name(), "segment_1528000123_5200_42.ts");
    }

    #[test]
    fn test_parse_accepts_other_extensions() {
        let parsed = SegmentName::parse("segment_10_5000_7.mp4").unwrap();
        assert_eq!(parsed.id, 7);
        assert_eq!(parsed.duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        let bad = [
            "",
            "segment_1_2.ts",
            "segment_1_2_3_4.ts",
            "clip_1_2_3.ts",
            "segment_x_2_3.ts",
            "segment_1_y_3.ts",
            "segment_1_2_z.ts",
            "segment_-1_2_3.ts",
            "chunk000000000001.h264",
        ];

        for name in bad {
            assert!(SegmentName::parse(name).is_err(), "expected {:?} to be rejected", name);
        }
    }

    #[test]
    fn test_segment_from_file_name_keeps_disk_name() {
        let segment = Segment::from_file_name("segment_100_4900_3.mp4", 1024).unwrap();

        assert_eq!(segment.id, 3);
        assert_eq!(segment.name, "segment_100_4900_3.mp4");
        assert_eq!(segment.created_at.timestamp(), 100);
        assert_eq!(segment.duration, Duration::from_millis(4_900));
        assert_eq!(segment.size, 1024);
    }

    #[test]
    fn test_out_of_range_time_still_yields_segment() {
        let segment = Segment::from_file_name("segment_99999999999999_5000_7.ts", 10).unwrap();

        assert_eq!(segment.id, 7);
        assert_eq!(segment.created_at, DateTime::<Utc>::MAX_UTC);
        assert_eq!(segment.name, "segment_99999999999999_5000_7.ts");
    }
}
