//! Wire protocol types for slicedrop chunked uploads.
//!
//! Shared by the server (which decodes requests and encodes envelopes) and
//! the client (which does the reverse). Also defines the typed store keys
//! and the persisted layout they map to.

pub mod constants;
pub mod envelope;
pub mod keys;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use envelope::ApiResponse;
pub use keys::{ArtifactKey, ChunkKey, KeyError, PartitionKey};
pub use messages::{ChunkQuery, FileQuery, MergeChunksRequest, UploadChunkFields};
pub use types::{ChunkStatus, FileIdentity, FileStatus};
