use thiserror::Error;

/// Errors raised by the segment store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Segment I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Incomplete segment copy: expected {expected} bytes, copied {copied}")]
    Integrity { expected: u64, copied: u64 },

    #[error("Invalid segment file name: {0}")]
    Parse(String),
}

impl StoreError {
    pub fn parse(msg: impl Into<String>) -> Self {
        StoreError::Parse(msg.into())
    }

    /// Returns true if the error means the published bytes cannot be trusted.
    pub fn is_integrity(&self) -> bool {
        matches!(self, StoreError::Integrity { .. })
    }
}
