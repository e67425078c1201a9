pub mod name;
pub mod retention;
pub mod store;

pub use name::{Segment, SegmentId, SegmentName, SEGMENT_EXTENSION};
pub use store::{load_segments, SegmentStore};
