//! Typed store keys and the persisted layout they map to.
//!
//! ```text
//! chunks/{fileHash}/{chunkSize}/{chunkHash}_{chunkIndex}
//! files/{fileHash}.{fileExt}
//! ```
//!
//! Every component is validated on construction, so a key can always be
//! joined onto a storage root without escaping it.

use std::fmt;

use crate::constants::{CHUNKS_DIR, FILES_DIR, MAX_CHUNK_COUNT, MAX_EXTENSION_LEN};

/// Errors produced when building or parsing a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid hash: {0:?}")]
    InvalidHash(String),

    #[error("invalid file extension: {0:?}")]
    InvalidExtension(String),

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("invalid chunk name: {0:?}")]
    InvalidChunkName(String),

    #[error("chunk index {0} is out of range")]
    ChunkIndexOutOfRange(u64),
}

/// Validates a content hash: 32 (MD5) or 64 (SHA-256) hex characters.
///
/// Returns the lowercase form.
pub fn normalize_hash(hash: &str) -> Result<String, KeyError> {
    let valid_len = hash.len() == 32 || hash.len() == 64;
    if !valid_len || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KeyError::InvalidHash(hash.to_string()));
    }
    Ok(hash.to_ascii_lowercase())
}

/// Validates a file extension: empty, or up to 16 ASCII alphanumerics.
pub fn validate_extension(ext: &str) -> Result<(), KeyError> {
    if ext.len() > MAX_EXTENSION_LEN || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(KeyError::InvalidExtension(ext.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PartitionKey
// ---------------------------------------------------------------------------

/// The `(fileHash, chunkSize)` pair naming one way of slicing a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    file_hash: String,
    chunk_size: u64,
}

impl PartitionKey {
    pub fn new(file_hash: &str, chunk_size: u64) -> Result<Self, KeyError> {
        if chunk_size == 0 {
            return Err(KeyError::ZeroChunkSize);
        }
        Ok(Self {
            file_hash: normalize_hash(file_hash)?,
            chunk_size,
        })
    }

    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Relative directory of this partition: `chunks/{fileHash}/{chunkSize}`.
    pub fn dir(&self) -> String {
        format!("{CHUNKS_DIR}/{}/{}", self.file_hash, self.chunk_size)
    }

    /// Builds the key of one chunk inside this partition.
    pub fn chunk(&self, chunk_hash: &str, chunk_index: u64) -> Result<ChunkKey, KeyError> {
        if chunk_index >= MAX_CHUNK_COUNT {
            return Err(KeyError::ChunkIndexOutOfRange(chunk_index));
        }
        Ok(ChunkKey {
            partition: self.clone(),
            chunk_hash: normalize_hash(chunk_hash)?,
            chunk_index,
        })
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.file_hash, self.chunk_size)
    }
}

// ---------------------------------------------------------------------------
// ChunkKey
// ---------------------------------------------------------------------------

/// Key of one stored chunk: `(fileHash, chunkSize, chunkHash, chunkIndex)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    partition: PartitionKey,
    chunk_hash: String,
    chunk_index: u64,
}

impl ChunkKey {
    pub fn new(
        file_hash: &str,
        chunk_size: u64,
        chunk_hash: &str,
        chunk_index: u64,
    ) -> Result<Self, KeyError> {
        PartitionKey::new(file_hash, chunk_size)?.chunk(chunk_hash, chunk_index)
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn chunk_hash(&self) -> &str {
        &self.chunk_hash
    }

    pub fn chunk_index(&self) -> u64 {
        self.chunk_index
    }

    /// File name inside the partition directory: `{chunkHash}_{chunkIndex}`.
    pub fn file_name(&self) -> String {
        format!("{}_{}", self.chunk_hash, self.chunk_index)
    }

    /// Full relative path of the chunk.
    pub fn path(&self) -> String {
        format!("{}/{}", self.partition.dir(), self.file_name())
    }

    /// Parses a chunk file name back into `(chunkHash, chunkIndex)`.
    ///
    /// The index is parsed as an integer; ordering chunks must use it rather
    /// than the name, since `"x_10"` sorts before `"x_2"` as a string.
    pub fn parse_file_name(name: &str) -> Result<(String, u64), KeyError> {
        let invalid = || KeyError::InvalidChunkName(name.to_string());
        let (hash, index) = name.split_once('_').ok_or_else(invalid)?;
        let hash = normalize_hash(hash).map_err(|_| invalid())?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let index = index.parse::<u64>().map_err(|_| invalid())?;
        if index >= MAX_CHUNK_COUNT {
            return Err(invalid());
        }
        Ok((hash, index))
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.file_name())
    }
}

// ---------------------------------------------------------------------------
// ArtifactKey
// ---------------------------------------------------------------------------

/// Key of a merged artifact: `(fileHash, fileExt)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    file_hash: String,
    file_ext: String,
}

impl ArtifactKey {
    pub fn new(file_hash: &str, file_ext: &str) -> Result<Self, KeyError> {
        validate_extension(file_ext)?;
        Ok(Self {
            file_hash: normalize_hash(file_hash)?,
            file_ext: file_ext.to_string(),
        })
    }

    pub fn file_hash(&self) -> &str {
        &self.file_hash
    }

    pub fn file_ext(&self) -> &str {
        &self.file_ext
    }

    /// `{fileHash}.{fileExt}`, or just `{fileHash}` when there is no extension.
    pub fn file_name(&self) -> String {
        if self.file_ext.is_empty() {
            self.file_hash.clone()
        } else {
            format!("{}.{}", self.file_hash, self.file_ext)
        }
    }

    /// Full relative path of the artifact.
    pub fn path(&self) -> String {
        format!("{FILES_DIR}/{}", self.file_name())
    }

    /// Public reference of the artifact under `prefix`.
    pub fn href(&self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self.file_name())
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
