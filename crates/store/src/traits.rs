//! Storage trait definitions.

use std::future::Future;
use std::pin::Pin;

use slicedrop_protocol::{ArtifactKey, ChunkKey, KeyError, PartitionKey};
use slicedrop_transfer::{HashAlgorithm, checksum_bytes};

use crate::error::{StoreError, StoreResult};

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Result of a chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// A valid chunk was already stored under the key; nothing was written.
    AlreadyPresent,
}

/// A chunk found by listing a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoredChunk {
    pub chunk_index: u64,
    pub chunk_hash: String,
}

/// Key-value chunk and artifact storage.
///
/// Implementations must make `put_chunk` idempotent and must never expose a
/// partially written chunk or artifact to readers.
pub trait ChunkStore: Send + Sync + 'static {
    /// Stores `data` under `key` after checking it hashes to the key's chunk hash.
    fn put_chunk<'a>(&'a self, key: &'a ChunkKey, data: Vec<u8>) -> StoreFuture<'a, PutOutcome>;

    /// Returns `true` if a chunk whose bytes still match its hash is stored.
    fn chunk_exists<'a>(&'a self, key: &'a ChunkKey) -> StoreFuture<'a, bool>;

    /// Reads a stored chunk's bytes.
    fn read_chunk<'a>(&'a self, key: &'a ChunkKey) -> StoreFuture<'a, Vec<u8>>;

    /// Lists the chunks of one partition, or `None` if the partition has no
    /// namespace yet. The order is unspecified.
    fn list_chunks<'a>(&'a self, partition: &'a PartitionKey)
    -> StoreFuture<'a, Option<Vec<StoredChunk>>>;

    fn artifact_exists<'a>(&'a self, key: &'a ArtifactKey) -> StoreFuture<'a, bool>;

    /// Opens a writer whose output becomes visible only on commit.
    fn create_artifact<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> StoreFuture<'a, Box<dyn ArtifactWriter>>;

    /// Short identifier used in logs.
    fn backend_name(&self) -> &'static str;
}

/// Streaming writer for a merged artifact.
pub trait ArtifactWriter: Send {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> StoreFuture<'a, ()>;

    /// Publishes the artifact and returns the bytes written.
    fn commit(self: Box<Self>) -> StoreFuture<'static, u64>;

    /// Discards everything written so far.
    fn abort(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// Checks `data` against a chunk hash, picking the algorithm from its length.
pub(crate) fn verify_digest(expected: &str, data: &[u8]) -> StoreResult<()> {
    let algorithm = HashAlgorithm::detect(expected)
        .ok_or_else(|| StoreError::InvalidKey(KeyError::InvalidHash(expected.to_string())))?;
    let actual = checksum_bytes(algorithm, data);
    if actual != expected {
        return Err(StoreError::HashMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Runs [`verify_digest`] on the blocking pool and hands the bytes back.
pub(crate) async fn verify_chunk(expected: &str, data: Vec<u8>) -> StoreResult<Vec<u8>> {
    let expected = expected.to_string();
    tokio::task::spawn_blocking(move || verify_digest(&expected, &data).map(|()| data))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}
