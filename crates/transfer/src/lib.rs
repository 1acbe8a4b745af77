//! Client side of the slicedrop chunked upload protocol.
//!
//! - [`Chunker`] / [`split_file`]: deterministic partitioning plus per-chunk
//!   and whole-file content hashes, in a single streamed pass.
//! - [`ResumeNegotiator`]: asks the server what already exists so only
//!   missing chunks are uploaded.
//! - [`UploadScheduler`]: bounded-concurrency, pausable task runner.
//!
//! The network boundary is the [`UploadApi`] trait; transports implement it.

mod api;
mod chunked;
mod resume;
mod scheduler;
mod types;

use std::time::Duration;

pub use api::{ApiFuture, UploadApi};
pub use chunked::{
    ChunkDescriptor, ChunkedFile, Chunker, ContentHasher, FileDigest, HashAlgorithm,
    calculate_file_checksum, checksum_bytes, file_extension, read_chunk, split_file,
};
pub use resume::{ResumeNegotiator, ResumePlan};
pub use scheduler::{TaskHandle, TaskState, UploadScheduler, UploadTask};
pub use types::{SessionProgress, UploadSession};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of chunk uploads in flight at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("read failure: {0}")]
    Read(#[from] std::io::Error),

    #[error("network failure: {0}")]
    Network(String),

    #[error("server error: {0}")]
    Api(String),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("invalid key: {0}")]
    Key(#[from] slicedrop_protocol::KeyError),

    #[error("cancelled")]
    Cancelled,
}
