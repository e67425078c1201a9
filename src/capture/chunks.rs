//! Raw chunk files in the capture working directory.
//!
//! The capture process names chunks with a fixed-width sequence number, so
//! lexical order is capture order and the last entry is the one still being
//! written.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::segments::SEGMENT_EXTENSION;

pub const CHUNK_EXTENSION: &str = "h264";

const CHUNK_PREFIX: &str = "chunk";

/// printf-style output pattern handed to the capture process.
pub const CHUNK_PATTERN: &str = "chunk%012d.h264";

pub fn chunk_file_name(sequence: u64) -> String {
    format!("{}{:012}.{}", CHUNK_PREFIX, sequence, CHUNK_EXTENSION)
}

fn is_chunk(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(CHUNK_EXTENSION)
}

/// A converted chunk left behind when the drain pass died before deleting it.
fn is_remux_leftover(path: &Path) -> bool {
    path.is_file()
        && path.extension().and_then(|e| e.to_str()) == Some(SEGMENT_EXTENSION)
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.starts_with(CHUNK_PREFIX))
}

/// Lists raw chunks in `dir`, oldest first.
pub fn list_chunks(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut chunks = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_chunk(&path) {
            chunks.push(path);
        }
    }

    chunks.sort();
    Ok(chunks)
}

/// Deletes every raw chunk in `dir`, along with converted chunks a crashed
/// drain pass never removed. Returns how many files were removed.
pub fn purge_chunks(dir: &Path) -> io::Result<usize> {
    let mut stale = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_chunk(&path) || is_remux_leftover(&path) {
            stale.push(path);
        }
    }

    for path in &stale {
        fs::remove_file(path)?;
    }

    if !stale.is_empty() {
        tracing::info!(target: "capture", "Purged {} stale chunks from {:?}", stale.len(), dir);
    }

    Ok(stale.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_file_name_is_fixed_width() {
        assert_eq!(chunk_file_name(0), "chunk000000000000.h264");
        assert_eq!(chunk_file_name(42), "chunk000000000042.h264");
    }

    #[test]
    fn test_list_chunks_sorted_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        for seq in [10, 2, 9] {
            fs::write(tmp.path().join(chunk_file_name(seq)), b"x").unwrap();
        }
        fs::write(tmp.path().join("chunk000000000001.ts"), b"x").unwrap();

        let names: Vec<_> = list_chunks(tmp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            vec![chunk_file_name(2), chunk_file_name(9), chunk_file_name(10)]
        );
    }

    #[test]
    fn test_purge_keeps_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(chunk_file_name(1)), b"x").unwrap();
        fs::write(tmp.path().join(chunk_file_name(2)), b"x").unwrap();
        fs::write(tmp.path().join("keep.ts"), b"x").unwrap();

        assert_eq!(purge_chunks(tmp.path()).unwrap(), 2);
        assert!(list_chunks(tmp.path()).unwrap().is_empty());
        assert!(tmp.path().join("keep.ts").exists());
    }

    #[test]
    fn test_purge_removes_converted_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(chunk_file_name(4)), b"x").unwrap();
        fs::write(tmp.path().join("chunk000000000003.ts"), b"x").unwrap();
        fs::write(tmp.path().join("segment_10_5000_1.ts"), b"x").unwrap();

        assert_eq!(purge_chunks(tmp.path()).unwrap(), 2);
        assert!(!tmp.path().join("chunk000000000003.ts").exists());
        assert!(tmp.path().join("segment_10_5000_1.ts").exists());
    }
}
