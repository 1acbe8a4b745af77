//! Data types for the upload flow.

use std::time::Duration;

use slicedrop_protocol::{FileIdentity, FileStatus};
use slicedrop_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT, HashAlgorithm, SessionProgress};

/// Config passed to the [`Uploader`](crate::Uploader).
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub chunk_size: u64,
    /// Chunk uploads in flight at once.
    pub max_concurrent: usize,
    /// Per-chunk deadline; an expired upload counts as failed.
    pub task_timeout: Option<Duration>,
    /// Extra rounds for chunks that failed. 0 means no retry.
    pub max_retries: u32,
    pub algorithm: HashAlgorithm,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            task_timeout: Some(Duration::from_secs(60)),
            max_retries: 3,
            algorithm: HashAlgorithm::default(),
        }
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A chunk was hashed while splitting. Best effort: dropped if the
    /// receiver lags.
    Hashed { index: u64, total: u64 },
    /// The file moved to a new status.
    Status(FileStatus),
    /// The server already holds these chunks.
    Skipped { indices: Vec<u64> },
    ChunkUploaded { index: u64, bytes: u64 },
    ChunkFailed {
        index: u64,
        attempt: u32,
        error: String,
    },
    /// Snapshot after each chunk settles.
    Progress(SessionProgress),
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    /// Public reference of the merged file.
    pub href: String,
    pub identity: FileIdentity,
    /// Chunks sent by this upload.
    pub uploaded_chunks: usize,
    /// Chunks the server already had.
    pub skipped_chunks: usize,
    /// `true` if the file was already on the server and nothing was sent.
    pub instant: bool,
}
