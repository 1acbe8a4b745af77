//! Network boundary of the upload protocol.

use std::future::Future;
use std::pin::Pin;

use slicedrop_protocol::{ArtifactKey, ChunkKey, MergeChunksRequest};

use crate::TransferError;

/// Boxed future returned by [`UploadApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// Server operations the client relies on.
///
/// The HTTP client implements this on top of reqwest; tests implement it
/// in memory. Keeping the trait here keeps negotiation and scheduling
/// independent of transport.
pub trait UploadApi: Send + Sync {
    /// Uploads one chunk's bytes under `key`.
    fn upload_chunk(&self, key: ChunkKey, data: Vec<u8>) -> ApiFuture<'_, ()>;

    /// Returns `true` if the merged artifact already exists.
    fn validate_file(&self, key: ArtifactKey) -> ApiFuture<'_, bool>;

    /// Returns the artifact's public reference, if it exists.
    fn file_href(&self, key: ArtifactKey) -> ApiFuture<'_, Option<String>>;

    /// Returns `true` if a valid chunk is stored under `key`.
    fn validate_chunk(&self, key: ChunkKey) -> ApiFuture<'_, bool>;

    /// Asks the server to merge a partition; returns the artifact reference.
    fn merge_chunks(&self, request: MergeChunksRequest) -> ApiFuture<'_, Option<String>>;
}
