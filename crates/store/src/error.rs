//! Store error types.

use slicedrop_protocol::KeyError;
use thiserror::Error;

/// Chunk store and merge errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Not every chunk of the partition is present. `missing` holds the
    /// lowest missing indices, at most [`MISSING_SHOWN`] of them, and
    /// `missing_count` the total. The count is zero when nothing at all was
    /// uploaded for the partition.
    #[error("chunks missing: {partition} ({})", describe_missing(.missing, .missing_count))]
    ChunksMissing {
        partition: String,
        missing: Vec<u64>,
        missing_count: u64,
    },

    #[error("merge failed: {0}")]
    MergeFailed(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Most missing indices carried by [`StoreError::ChunksMissing`].
pub const MISSING_SHOWN: usize = 16;

fn describe_missing(missing: &[u64], missing_count: &u64) -> String {
    if *missing_count == 0 {
        return "no chunks uploaded".to_string();
    }
    let mut list = missing
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let more = missing_count.saturating_sub(missing.len() as u64);
    if more > 0 {
        list.push_str(&format!(" and {more} more"));
    }
    format!("indices {list}")
}
