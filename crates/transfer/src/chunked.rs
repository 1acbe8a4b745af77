use std::fmt;
use std::io::{ErrorKind, Read, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use md5::Md5;
use sha2::{Digest, Sha256};
use slicedrop_protocol::keys::validate_extension;
use slicedrop_protocol::{ArtifactKey, ChunkKey, FileIdentity, KeyError, PartitionKey};
use tracing::{debug, info};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Content hash algorithm.
///
/// The server infers the algorithm from the hex length of a hash, so the
/// choice never needs to be sent on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Length of a hex digest produced by this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Infers the algorithm that produced `hex_digest`.
    pub fn detect(hex_digest: &str) -> Option<Self> {
        match hex_digest.len() {
            32 => Some(Self::Md5),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Returns a fresh incremental hasher.
    pub fn hasher(self) -> ContentHasher {
        match self {
            Self::Md5 => ContentHasher::Md5(Md5::new()),
            Self::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => f.write_str("md5"),
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash algorithm: {other}")),
        }
    }
}

/// Incremental hasher producing lowercase hex digests.
#[derive(Clone)]
pub enum ContentHasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes the digest of `data` and returns it hex-encoded.
pub fn checksum_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hasher.finalize()
}

/// Computes the digest of an entire file and returns it hex-encoded.
pub fn calculate_file_checksum(
    path: &Path,
    algorithm: HashAlgorithm,
) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = algorithm.hasher();
    let mut buf = [0u8; 8192];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// One chunk of a partitioned file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 0-based position of the chunk.
    pub index: u64,
    /// Hex digest of the chunk's bytes.
    pub hash: String,
    /// Partition size the file was sliced with.
    pub chunk_size: u64,
    /// Byte range `[start, end)` inside the source.
    pub range: Range<u64>,
    /// Free-form display label attached by the split callback.
    pub label: Option<String>,
}

impl ChunkDescriptor {
    /// Number of bytes in this chunk.
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Result of a completed chunking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Hex digest of the whole source.
    pub hash: String,
    /// Total bytes read.
    pub size: u64,
    /// Number of chunks produced.
    pub chunk_count: u64,
}

/// Streams a source in fixed-size chunks, hashing each chunk and the whole
/// source in a single pass.
///
/// Chunk `i` covers `[i * chunk_size, min((i + 1) * chunk_size, size))`.
/// Only one chunk is buffered at a time. A read error ends the pass; the
/// chunker then refuses to produce a digest.
pub struct Chunker<R> {
    reader: R,
    chunk_size: u64,
    algorithm: HashAlgorithm,
    file_hasher: ContentHasher,
    buf: Vec<u8>,
    offset: u64,
    index: u64,
    done: bool,
    failed: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(
        reader: R,
        chunk_size: u64,
        algorithm: HashAlgorithm,
    ) -> Result<Self, TransferError> {
        let buf_len = usize::try_from(chunk_size).map_err(|_| TransferError::InvalidChunkSize)?;
        if buf_len == 0 {
            return Err(TransferError::InvalidChunkSize);
        }
        Ok(Self {
            reader,
            chunk_size,
            algorithm,
            file_hasher: algorithm.hasher(),
            buf: vec![0u8; buf_len],
            offset: 0,
            index: 0,
            done: false,
            failed: false,
        })
    }

    /// Reads and hashes the next chunk. Returns `None` at end of input.
    pub fn next_chunk(&mut self) -> Result<Option<ChunkDescriptor>, TransferError> {
        if self.done {
            return Ok(None);
        }

        let n = match fill_buf(&mut self.reader, &mut self.buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                self.failed = true;
                return Err(TransferError::Read(e));
            }
        };
        if n < self.buf.len() {
            self.done = true;
        }
        if n == 0 {
            return Ok(None);
        }

        let data = &self.buf[..n];
        let hash = checksum_bytes(self.algorithm, data);
        self.file_hasher.update(data);

        let start = self.offset;
        self.offset += n as u64;
        let chunk = ChunkDescriptor {
            index: self.index,
            hash,
            chunk_size: self.chunk_size,
            range: start..self.offset,
            label: None,
        };
        self.index += 1;
        Ok(Some(chunk))
    }

    /// Consumes any remaining chunks and returns the whole-source digest.
    pub fn finish(mut self) -> Result<FileDigest, TransferError> {
        while self.next_chunk()?.is_some() {}
        if self.failed {
            return Err(TransferError::Read(std::io::Error::other(
                "source failed during chunking",
            )));
        }
        Ok(FileDigest {
            hash: self.file_hasher.finalize(),
            size: self.offset,
            chunk_count: self.index,
        })
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<ChunkDescriptor, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Reads until `buf` is full or the source is exhausted.
fn fill_buf<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// ChunkedFile
// ---------------------------------------------------------------------------

/// A local file partitioned into chunks, ready for negotiation and upload.
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub chunk_size: u64,
    pub algorithm: HashAlgorithm,
    pub chunks: Vec<ChunkDescriptor>,
}

impl ChunkedFile {
    pub fn chunk_count(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn partition_key(&self) -> Result<PartitionKey, KeyError> {
        PartitionKey::new(&self.identity.file_hash, self.chunk_size)
    }

    pub fn artifact_key(&self) -> Result<ArtifactKey, KeyError> {
        ArtifactKey::new(&self.identity.file_hash, &self.identity.file_ext)
    }

    pub fn chunk_key(&self, chunk: &ChunkDescriptor) -> Result<ChunkKey, KeyError> {
        self.partition_key()?.chunk(&chunk.hash, chunk.index)
    }

    /// Re-reads one chunk from disk and checks it still matches its hash.
    pub async fn load(&self, chunk: &ChunkDescriptor) -> Result<Vec<u8>, TransferError> {
        let data = read_chunk(&self.path, chunk.range.clone()).await?;
        if checksum_bytes(self.algorithm, &data) != chunk.hash {
            return Err(TransferError::Read(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("chunk {} changed on disk since it was hashed", chunk.index),
            )));
        }
        Ok(data)
    }
}

/// Partitions the file at `path` into `chunk_size` chunks.
///
/// `on_chunk` runs for every chunk, in order, before it is recorded; it
/// receives `(chunk, index, total)` and may set the chunk's label. It runs
/// inline with hashing, so it should be cheap.
pub fn split_file<F>(
    path: &Path,
    chunk_size: u64,
    algorithm: HashAlgorithm,
    mut on_chunk: F,
) -> Result<ChunkedFile, TransferError>
where
    F: FnMut(&mut ChunkDescriptor, u64, u64),
{
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }

    let started = Instant::now();
    let file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let total = size.div_ceil(chunk_size);

    let mut chunker = Chunker::new(file, chunk_size, algorithm)?;
    let mut chunks = Vec::new();
    while let Some(mut chunk) = chunker.next_chunk()? {
        let index = chunk.index;
        debug!(index, total, hash = %chunk.hash, "chunk hashed");
        on_chunk(&mut chunk, index, total);
        chunks.push(chunk);
    }
    let digest = chunker.finish()?;

    info!(
        path = %path.display(),
        file_hash = %digest.hash,
        size = digest.size,
        chunks = digest.chunk_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "file split into chunks"
    );

    Ok(ChunkedFile {
        path: path.to_path_buf(),
        identity: FileIdentity {
            file_hash: digest.hash,
            file_ext: file_extension(path),
            size: digest.size,
        },
        chunk_size,
        algorithm,
        chunks,
    })
}

/// Reads the bytes of `range` from the file at `path`.
pub async fn read_chunk(path: &Path, range: Range<u64>) -> Result<Vec<u8>, TransferError> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let len = usize::try_from(range.end.saturating_sub(range.start))
        .map_err(|_| TransferError::InvalidChunkSize)?;
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Extension of `path` if it is a valid artifact extension, else empty.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| validate_extension(ext).is_ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Yields at most 3 bytes per read to exercise short reads.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.0.read(&mut buf[..n])
        }
    }

    /// Fails after `ok_bytes` bytes.
    struct Failing {
        ok_bytes: usize,
    }

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.ok_bytes == 0 {
                return Err(std::io::Error::other("disk unplugged"));
            }
            let n = buf.len().min(self.ok_bytes);
            buf[..n].fill(7);
            self.ok_bytes -= n;
            Ok(n)
        }
    }

    #[test]
    fn md5_known_vector() {
        assert_eq!(
            checksum_bytes(HashAlgorithm::Md5, b"The quick brown fox jumps over the lazy dog"),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn sha256_digest_length() {
        let c = checksum_bytes(HashAlgorithm::Sha256, b"hello world");
        assert_eq!(c.len(), 64);
        assert_eq!(HashAlgorithm::detect(&c), Some(HashAlgorithm::Sha256));
    }

    #[test]
    fn algorithm_parses_from_str() {
        assert_eq!("MD5".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Md5));
        assert_eq!("sha256".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Sha256));
        assert!("crc32".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn chunk_boundaries_are_deterministic() {
        let data = b"AABBCCDDEE"; // 10 bytes.
        let mut chunker = Chunker::new(Cursor::new(data.to_vec()), 4, HashAlgorithm::Md5).unwrap();

        let c0 = chunker.next_chunk().unwrap().unwrap();
        assert_eq!((c0.index, c0.range.clone()), (0, 0..4));
        assert_eq!(c0.hash, checksum_bytes(HashAlgorithm::Md5, b"AABB"));

        let c1 = chunker.next_chunk().unwrap().unwrap();
        assert_eq!((c1.index, c1.range.clone()), (1, 4..8));

        let c2 = chunker.next_chunk().unwrap().unwrap();
        assert_eq!((c2.index, c2.range.clone()), (2, 8..10));
        assert_eq!(c2.len(), 2);

        assert!(chunker.next_chunk().unwrap().is_none());

        let digest = chunker.finish().unwrap();
        assert_eq!(digest.size, 10);
        assert_eq!(digest.chunk_count, 3);
        assert_eq!(digest.hash, checksum_bytes(HashAlgorithm::Md5, data));
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let chunks: Vec<_> = Chunker::new(Cursor::new(vec![1u8; 8]), 4, HashAlgorithm::Md5)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4));
    }

    #[test]
    fn short_reads_do_not_shift_boundaries() {
        let data = patterned(100);
        let chunks: Vec<_> = Chunker::new(Trickle(Cursor::new(data.clone())), 16, HashAlgorithm::Md5)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 7);
        for chunk in &chunks {
            let slice = &data[chunk.range.start as usize..chunk.range.end as usize];
            assert_eq!(chunk.hash, checksum_bytes(HashAlgorithm::Md5, slice));
        }
    }

    #[test]
    fn chunks_concatenate_back_to_source() {
        let data = patterned(1000);
        for chunk_size in [1u64, 7, 64, 999, 1000, 4096] {
            let chunks: Vec<_> = Chunker::new(Cursor::new(data.clone()), chunk_size, HashAlgorithm::Md5)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            let mut rebuilt = Vec::new();
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i as u64);
                rebuilt.extend_from_slice(&data[chunk.range.start as usize..chunk.range.end as usize]);
            }
            assert_eq!(rebuilt, data, "chunk_size {chunk_size}");
        }
    }

    #[test]
    fn file_hash_invariant_to_chunk_size() {
        let data = patterned(5000);
        let expected = checksum_bytes(HashAlgorithm::Sha256, &data);
        for chunk_size in [1u64, 3, 512, 4096, 10_000] {
            let chunker = Chunker::new(Cursor::new(data.clone()), chunk_size, HashAlgorithm::Sha256).unwrap();
            assert_eq!(chunker.finish().unwrap().hash, expected);
        }
    }

    #[test]
    fn empty_source_yields_no_chunks() {
        let mut chunker = Chunker::new(Cursor::new(Vec::new()), 4, HashAlgorithm::Md5).unwrap();
        assert!(chunker.next_chunk().unwrap().is_none());
        let digest = chunker.finish().unwrap();
        assert_eq!(digest.chunk_count, 0);
        assert_eq!(digest.hash, checksum_bytes(HashAlgorithm::Md5, b""));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(
            Chunker::new(Cursor::new(vec![1u8]), 0, HashAlgorithm::Md5),
            Err(TransferError::InvalidChunkSize)
        ));
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"x");
        assert!(matches!(
            split_file(&path, 0, HashAlgorithm::Md5, |_, _, _| {}),
            Err(TransferError::InvalidChunkSize)
        ));
    }

    #[test]
    fn read_error_aborts_with_read_failure() {
        let mut chunker = Chunker::new(Failing { ok_bytes: 10 }, 4, HashAlgorithm::Md5).unwrap();
        assert!(chunker.next_chunk().unwrap().is_some());
        assert!(chunker.next_chunk().unwrap().is_some());
        assert!(matches!(chunker.next_chunk(), Err(TransferError::Read(_))));
        assert!(matches!(chunker.finish(), Err(TransferError::Read(_))));
    }

    #[test]
    fn split_file_reports_identity_and_labels() {
        let dir = TempDir::new().unwrap();
        let data = patterned(10);
        let path = create_test_file(dir.path(), "movie.mp4", &data);

        let mut seen = Vec::new();
        let file = split_file(&path, 4, HashAlgorithm::Md5, |chunk, index, total| {
            seen.push((index, total));
            chunk.label = Some(format!("{}/{}", index + 1, total));
        })
        .unwrap();

        assert_eq!(seen, vec![(0, 3), (1, 3), (2, 3)]);
        assert_eq!(file.identity.file_ext, "mp4");
        assert_eq!(file.identity.size, 10);
        assert_eq!(
            file.identity.file_hash,
            calculate_file_checksum(&path, HashAlgorithm::Md5).unwrap()
        );
        assert_eq!(file.chunks[2].label.as_deref(), Some("3/3"));
        assert_eq!(file.chunk_count(), 3);
    }

    #[test]
    fn split_file_missing_path_is_read_failure() {
        let dir = TempDir::new().unwrap();
        let result = split_file(&dir.path().join("nope"), 4, HashAlgorithm::Md5, |_, _, _| {});
        assert!(matches!(result, Err(TransferError::Read(_))));
    }

    #[test]
    fn unsafe_extension_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "archive.t-z", b"abc");
        let file = split_file(&path, 4, HashAlgorithm::Md5, |_, _, _| {}).unwrap();
        assert_eq!(file.identity.file_ext, "");
    }

    #[tokio::test]
    async fn load_rereads_chunk_bytes() {
        let dir = TempDir::new().unwrap();
        let data = patterned(10);
        let path = create_test_file(dir.path(), "x.bin", &data);
        let file = split_file(&path, 4, HashAlgorithm::Md5, |_, _, _| {}).unwrap();

        assert_eq!(file.load(&file.chunks[1]).await.unwrap(), data[4..8].to_vec());
        assert_eq!(file.load(&file.chunks[2]).await.unwrap(), data[8..10].to_vec());
    }

    #[tokio::test]
    async fn load_detects_modified_source() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "x.bin", b"AAAABBBB");
        let file = split_file(&path, 4, HashAlgorithm::Md5, |_, _, _| {}).unwrap();
        std::fs::write(&path, b"AAAACCCC").unwrap();

        assert!(file.load(&file.chunks[0]).await.is_ok());
        assert!(matches!(
            file.load(&file.chunks[1]).await,
            Err(TransferError::Read(_))
        ));
    }

    #[test]
    fn chunk_keys_use_partition() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "x.bin", b"0123456789");
        let file = split_file(&path, 4, HashAlgorithm::Md5, |_, _, _| {}).unwrap();
        let key = file.chunk_key(&file.chunks[1]).unwrap();
        assert_eq!(key.partition().chunk_size(), 4);
        assert_eq!(key.partition().file_hash(), file.identity.file_hash);
        assert_eq!(key.chunk_index(), 1);
    }
}
