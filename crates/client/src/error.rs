//! Client error types.

use slicedrop_transfer::TransferError;

/// Errors produced by an upload.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("invalid key: {0}")]
    Key(#[from] slicedrop_protocol::KeyError),

    /// Chunks still failing after every retry round.
    #[error("{} chunk(s) failed to upload (indices {indices:?}): {last_error}", indices.len())]
    ChunksFailed {
        indices: Vec<u64>,
        last_error: String,
    },

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
