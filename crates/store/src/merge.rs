//! Reassembles a partition's chunks into the final artifact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use slicedrop_protocol::constants::MAX_CHUNK_COUNT;
use slicedrop_protocol::{ArtifactKey, KeyError, PartitionKey};
use slicedrop_transfer::HashAlgorithm;
use tracing::{debug, info, warn};

use crate::error::{MISSING_SHOWN, StoreError, StoreResult};
use crate::traits::{ArtifactWriter, ChunkStore, StoredChunk};

/// Result of a successful merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The artifact was written by this call.
    Merged { artifact: ArtifactKey, bytes: u64 },
    /// The artifact already existed; nothing was written.
    AlreadyExists { artifact: ArtifactKey },
}

impl MergeOutcome {
    pub fn artifact(&self) -> &ArtifactKey {
        match self {
            Self::Merged { artifact, .. } | Self::AlreadyExists { artifact } => artifact,
        }
    }
}

type ArtifactLocks = Mutex<HashMap<ArtifactKey, Arc<tokio::sync::Mutex<()>>>>;

/// Merges uploaded chunks, one merge per artifact at a time.
pub struct MergeEngine {
    store: Arc<dyn ChunkStore>,
    locks: ArtifactLocks,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Merges `partition` into the artifact `(fileHash, file_ext)`.
    ///
    /// With `expected_chunks`, the partition must hold exactly that many
    /// chunks; without it, indices must still run from 0 with no gaps.
    pub async fn merge(
        &self,
        partition: &PartitionKey,
        file_ext: &str,
        expected_chunks: Option<u64>,
    ) -> StoreResult<MergeOutcome> {
        let artifact = ArtifactKey::new(partition.file_hash(), file_ext)?;
        let lease = self.lease(&artifact);
        let _guard = lease.lock.lock().await;
        self.merge_locked(partition, artifact, expected_chunks).await
    }

    /// Number of artifacts with a merge running or waiting.
    pub fn active_merges(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lease(&self, artifact: &ArtifactKey) -> LockLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(artifact.clone()).or_default());
        LockLease {
            locks: &self.locks,
            artifact: artifact.clone(),
            lock,
        }
    }

    async fn merge_locked(
        &self,
        partition: &PartitionKey,
        artifact: ArtifactKey,
        expected_chunks: Option<u64>,
    ) -> StoreResult<MergeOutcome> {
        if self.store.artifact_exists(&artifact).await? {
            debug!(artifact = %artifact, "artifact already exists, skipping merge");
            return Ok(MergeOutcome::AlreadyExists { artifact });
        }

        let mut chunks = match self.store.list_chunks(partition).await? {
            Some(chunks) => chunks,
            // An empty file has no chunks to upload.
            None if expected_chunks == Some(0) => Vec::new(),
            None => {
                return Err(StoreError::ChunksMissing {
                    partition: partition.to_string(),
                    missing: Vec::new(),
                    missing_count: 0,
                });
            }
        };
        // Backends list in no particular order.
        chunks.sort();
        check_complete(partition, &chunks, expected_chunks)?;

        let started = Instant::now();
        let mut writer = self.store.create_artifact(&artifact).await?;
        if let Err(e) = self.write_chunks(partition, &chunks, writer.as_mut()).await {
            warn!(artifact = %artifact, error = %e, "merge aborted");
            if let Err(abort_err) = writer.abort().await {
                warn!(artifact = %artifact, error = %abort_err, "failed to discard partial artifact");
            }
            return Err(e);
        }
        let bytes = writer
            .commit()
            .await
            .map_err(|e| StoreError::MergeFailed(format!("publishing {artifact}: {e}")))?;

        info!(
            artifact = %artifact,
            partition = %partition,
            chunks = chunks.len(),
            bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            backend = self.store.backend_name(),
            "chunks merged"
        );
        Ok(MergeOutcome::Merged { artifact, bytes })
    }

    /// Streams every chunk, in index order, into `writer` and checks the
    /// result hashes to the partition's file hash.
    async fn write_chunks(
        &self,
        partition: &PartitionKey,
        chunks: &[StoredChunk],
        writer: &mut dyn ArtifactWriter,
    ) -> StoreResult<()> {
        let algorithm = HashAlgorithm::detect(partition.file_hash()).ok_or_else(|| {
            StoreError::InvalidKey(KeyError::InvalidHash(partition.file_hash().to_string()))
        })?;
        let mut hasher = algorithm.hasher();

        for chunk in chunks {
            let key = partition.chunk(&chunk.chunk_hash, chunk.chunk_index)?;
            let data = self.store.read_chunk(&key).await.map_err(|e| {
                StoreError::MergeFailed(format!("reading chunk {}: {e}", chunk.chunk_index))
            })?;
            hasher.update(&data);
            writer.write(&data).await.map_err(|e| {
                StoreError::MergeFailed(format!("writing chunk {}: {e}", chunk.chunk_index))
            })?;
        }

        let actual = hasher.finalize();
        if actual != partition.file_hash() {
            return Err(StoreError::MergeFailed(format!(
                "merged content hashes to {actual}, expected {}",
                partition.file_hash()
            )));
        }
        Ok(())
    }
}

/// Checks that `chunks` (sorted by index) cover `0..k` exactly once.
///
/// Walks only the gaps between stored indices.
fn check_complete(
    partition: &PartitionKey,
    chunks: &[StoredChunk],
    expected_chunks: Option<u64>,
) -> StoreResult<()> {
    if let Some(count) = expected_chunks.filter(|&count| count > MAX_CHUNK_COUNT) {
        return Err(StoreError::MergeFailed(format!(
            "chunk count {count} exceeds the limit of {MAX_CHUNK_COUNT}"
        )));
    }

    if let Some(pair) = chunks
        .windows(2)
        .find(|pair| pair[0].chunk_index == pair[1].chunk_index)
    {
        return Err(StoreError::MergeFailed(format!(
            "chunk {} stored under more than one hash",
            pair[0].chunk_index
        )));
    }

    let highest = match chunks.last() {
        Some(last) => last
            .chunk_index
            .checked_add(1)
            .filter(|&count| count <= MAX_CHUNK_COUNT)
            .ok_or_else(|| {
                StoreError::MergeFailed(format!("chunk index {} is out of range", last.chunk_index))
            })?,
        None => 0,
    };
    let expected = expected_chunks.unwrap_or(highest);
    if highest > expected {
        return Err(StoreError::MergeFailed(format!(
            "chunk {} is beyond the expected count of {expected}",
            highest - 1
        )));
    }

    let mut missing = Vec::new();
    let mut missing_count = 0u64;
    let mut next = 0u64;
    // `expected` closes the final gap.
    let bounds = chunks.iter().map(|c| c.chunk_index).chain(std::iter::once(expected));
    for index in bounds {
        missing_count += index - next;
        let room = MISSING_SHOWN.saturating_sub(missing.len());
        missing.extend((next..index).take(room));
        next = index + 1;
    }
    if missing_count > 0 {
        return Err(StoreError::ChunksMissing {
            partition: partition.to_string(),
            missing,
            missing_count,
        });
    }
    Ok(())
}

/// Holds one artifact's merge lock; drops the map entry when the last
/// holder goes away.
struct LockLease<'a> {
    locks: &'a ArtifactLocks,
    artifact: ArtifactKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this lease hold the only references.
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.artifact);
        }
    }
}
