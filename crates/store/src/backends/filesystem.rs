//! Local filesystem chunk store.
//!
//! Layout under the root:
//!
//! ```text
//! chunks/{fileHash}/{chunkSize}/{chunkHash}_{chunkIndex}
//! files/{fileHash}.{fileExt}
//! ```
//!
//! Every write lands in a uniquely named temporary sibling, is fsynced and
//! then renamed into place, so readers see either nothing or the whole file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use slicedrop_protocol::constants::{CHUNKS_DIR, FILES_DIR};
use slicedrop_protocol::{ArtifactKey, ChunkKey, PartitionKey};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    ArtifactWriter, ChunkStore, PutOutcome, StoreFuture, StoredChunk, verify_chunk, verify_digest,
};

/// Marker separating a final name from the random suffix of a temp file.
const TEMP_MARKER: &str = ".tmp.";

/// Chunk store rooted at a local directory.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(CHUNKS_DIR)).await?;
        fs::create_dir_all(root.join(FILES_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory merged artifacts are published into.
    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    fn temp_sibling(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{name}{TEMP_MARKER}{}", Uuid::new_v4()))
    }

    async fn ensure_parent(path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
        Self::ensure_parent(path).await?;
        let temp_path = Self::temp_sibling(path);
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Returns `true` if `path` holds bytes matching `expected`.
    async fn stored_chunk_valid(path: PathBuf, expected: &str) -> StoreResult<bool> {
        let expected = expected.to_string();
        tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Ok(verify_digest(&expected, &bytes).is_ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

impl ChunkStore for FilesystemStore {
    fn put_chunk<'a>(&'a self, key: &'a ChunkKey, data: Vec<u8>) -> StoreFuture<'a, PutOutcome> {
        Box::pin(async move {
            let data = verify_chunk(key.chunk_hash(), data).await?;
            let path = self.root.join(key.path());

            if Self::stored_chunk_valid(path.clone(), key.chunk_hash()).await? {
                debug!(chunk = %key, "chunk already stored");
                return Ok(PutOutcome::AlreadyPresent);
            }
            Self::write_atomic(&path, &data).await?;
            debug!(chunk = %key, size = data.len(), "chunk stored");
            Ok(PutOutcome::Stored)
        })
    }

    fn chunk_exists<'a>(&'a self, key: &'a ChunkKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let path = self.root.join(key.path());
            let valid = Self::stored_chunk_valid(path, key.chunk_hash()).await?;
            Ok(valid)
        })
    }

    fn read_chunk<'a>(&'a self, key: &'a ChunkKey) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move { Ok(fs::read(self.root.join(key.path())).await?) })
    }

    fn list_chunks<'a>(
        &'a self,
        partition: &'a PartitionKey,
    ) -> StoreFuture<'a, Option<Vec<StoredChunk>>> {
        Box::pin(async move {
            let dir = self.root.join(partition.dir());
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            let mut chunks = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.contains(TEMP_MARKER) {
                    continue;
                }
                match ChunkKey::parse_file_name(&name) {
                    Ok((chunk_hash, chunk_index)) => chunks.push(StoredChunk {
                        chunk_index,
                        chunk_hash,
                    }),
                    Err(_) => warn!(
                        partition = %partition,
                        file = %name,
                        "ignoring unrecognised file in partition"
                    ),
                }
            }
            chunks.sort();
            Ok(Some(chunks))
        })
    }

    fn artifact_exists<'a>(&'a self, key: &'a ArtifactKey) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            match fs::metadata(self.root.join(key.path())).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn create_artifact<'a>(
        &'a self,
        key: &'a ArtifactKey,
    ) -> StoreFuture<'a, Box<dyn ArtifactWriter>> {
        Box::pin(async move {
            let final_path = self.root.join(key.path());
            Self::ensure_parent(&final_path).await?;
            let temp_path = Self::temp_sibling(&final_path);
            let file = fs::File::create(&temp_path).await?;
            Ok(Box::new(FilesystemArtifactWriter {
                file,
                temp_path,
                final_path,
                bytes_written: 0,
            }) as Box<dyn ArtifactWriter>)
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// Artifact being merged into a temporary file.
struct FilesystemArtifactWriter {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl ArtifactWriter for FilesystemArtifactWriter {
    fn write<'a>(&'a mut self, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.file.write_all(data).await?;
            self.bytes_written += data.len() as u64;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, u64> {
        Box::pin(async move {
            let Self {
                mut file,
                temp_path,
                final_path,
                bytes_written,
            } = *self;
            let published = async {
                file.flush().await?;
                file.sync_all().await?;
                drop(file);
                fs::rename(&temp_path, &final_path).await
            }
            .await;
            if let Err(e) = published {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
            Ok(bytes_written)
        })
    }

    fn abort(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            let Self { file, temp_path, .. } = *self;
            drop(file);
            if let Err(e) = fs::remove_file(&temp_path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %e, "failed to remove partial artifact");
                }
            }
            Ok(())
        })
    }
}
