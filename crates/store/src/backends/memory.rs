//! In-memory chunk store, for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slicedrop_protocol::{ArtifactKey, ChunkKey, PartitionKey};

use crate::error::StoreError;
use crate::traits::{
    ArtifactWriter, ChunkStore, PutOutcome, StoreFuture, StoredChunk, verify_chunk, verify_digest,
};

#[derive(Default)]
struct MemoryInner {
    /// Partition dir -> chunk file name -> bytes.
    partitions: HashMap<String, BTreeMap<String, Vec<u8>>>,
    artifacts: HashMap<String, Vec<u8>>,
}

/// Chunk store kept entirely in memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        lock(&self.inner)
    }

    /// Bytes of a committed artifact.
    pub fn artifact_bytes(&self, key: &ArtifactKey) -> Option<Vec<u8>> {
        self.lock().artifacts.get(&key.path()).cloned()
    }

    /// Overwrites a stored chunk without any checks.
    pub fn overwrite_chunk(&self, key: &ChunkKey, data: Vec<u8>) {
        self.lock()
            .partitions
            .entry(key.partition().dir())
            .or_default()
            .insert(key.file_name(), data);
    }

    fn stored_chunk(&self, key: &ChunkKey) -> Option<Vec<u8>> {
        self.lock()
            .partitions
            .get(&key.partition().dir())
            .and_then(|chunks| chunks.get(&key.file_name()))
            .cloned()
    }

    fn stored_chunk_valid(&self, key: &ChunkKey) -> bool {
        self.stored_chunk(key)
            .is_some_and(|bytes| verify_digest(key.chunk_hash(), &bytes).is_ok())
    }
}

fn lock(inner: &Mutex<MemoryInner>) -> MutexGuard<'_, MemoryInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChunkStore for MemoryStore {
    fn put_chunk<'a>(&'a self, key: &'a ChunkKey, data: Vec<u8>) -> StoreFuture<'a, PutOutcome> {
        Box::pin(async move {
            let data = verify_chunk(key.chunk_hash(), data).await?;
            if self.stored_chunk_valid(key) {
                return Ok(PutOutcome::AlreadyPresent);
            }
            self.overwrite_chunk(key, data);
            Ok(PutOutcome::Stored)
        })
    }

    fn chunk_exists<'a>(&'a self, key: &'a ChunkKey) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.stored_chunk_valid(key)) })
    }

    fn read_chunk<'a>(&'a self, key: &'a ChunkKey) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.stored_chunk(key).ok_or_else(|| {
                StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    key.path(),
                ))
            })
        })
    }

    fn list_chunks<'a>(
        &'a self,
        partition: &'a PartitionKey,
    ) -> StoreFuture<'a, Option<Vec<StoredChunk>>> {
        Box::pin(async move {
            let inner = self.lock();
            let Some(chunks) = inner.partitions.get(&partition.dir()) else {
                return Ok(None);
            };
            let mut listed: Vec<StoredChunk> = chunks
                .keys()
                .filter_map(|name| ChunkKey::parse_file_name(name).ok())
                .map(|(chunk_hash, chunk_index)| StoredChunk {
                    chunk_index,
                    chunk_hash,
                })
                .collect();
            listed.sort();
            Ok(Some(listed))
        })
    }

    fn artifact_exists<'a>(&'a self, key: &'a ArtifactKey) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.lock().artifacts.contains_key(&key.path())) })
    }

    fn create_artifact<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> StoreFuture<'a, Box<dyn ArtifactWriter>> {
        Box::pin(async move {
            Ok(Box::new(MemoryArtifactWriter {
                inner: Arc::clone(&self.inner),
                path: key.path(),
                buf: Vec::new(),
            }) as Box<dyn ArtifactWriter>)
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryArtifactWriter {
    inner: Arc<Mutex<MemoryInner>>,
    path: String,
    buf: Vec<u8>,
}

impl ArtifactWriter for MemoryArtifactWriter {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> StoreFuture<'a, ()> {
        self.buf.extend_from_slice(data);
        Box::pin(async { Ok(()) })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, u64> {
        Box::pin(async move {
            let Self { inner, path, buf } = *self;
            let len = buf.len() as u64;
            lock(&inner).artifacts.insert(path, buf);
            Ok(len)
        })
    }

    fn abort(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async { Ok(()) })
    }
}
