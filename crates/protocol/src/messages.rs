use serde::{Deserialize, Serialize};

use crate::keys::{ArtifactKey, ChunkKey, KeyError, PartitionKey};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Form fields accompanying a chunk upload (`POST /upload/chunk`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkFields {
    pub file_hash: String,
    pub chunk_size: u64,
    pub chunk_hash: String,
    pub chunk_index: u64,
}

impl UploadChunkFields {
    pub fn chunk_key(&self) -> Result<ChunkKey, KeyError> {
        ChunkKey::new(
            &self.file_hash,
            self.chunk_size,
            &self.chunk_hash,
            self.chunk_index,
        )
    }
}

impl From<&ChunkKey> for UploadChunkFields {
    fn from(key: &ChunkKey) -> Self {
        Self {
            file_hash: key.partition().file_hash().to_string(),
            chunk_size: key.partition().chunk_size(),
            chunk_hash: key.chunk_hash().to_string(),
            chunk_index: key.chunk_index(),
        }
    }
}

/// Query of `validate-file` and `get-file-href`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    #[serde(default)]
    pub file_ext: String,
}

/// Query of `validate-chunk/{chunkHash}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    pub chunk_index: u64,
    pub file_hash: String,
    pub chunk_size: u64,
}

impl ChunkQuery {
    pub fn chunk_key(&self, chunk_hash: &str) -> Result<ChunkKey, KeyError> {
        ChunkKey::new(&self.file_hash, self.chunk_size, chunk_hash, self.chunk_index)
    }
}

impl From<&ChunkKey> for ChunkQuery {
    fn from(key: &ChunkKey) -> Self {
        Self {
            chunk_index: key.chunk_index(),
            file_hash: key.partition().file_hash().to_string(),
            chunk_size: key.partition().chunk_size(),
        }
    }
}

/// Body of `POST /upload/merge-chunks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeChunksRequest {
    #[serde(default)]
    pub file_ext: String,
    pub file_hash: String,
    pub chunk_size: u64,
    /// Total number of chunks the client produced; enables exact gap detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u64>,
}

impl MergeChunksRequest {
    pub fn partition_key(&self) -> Result<PartitionKey, KeyError> {
        PartitionKey::new(&self.file_hash, self.chunk_size)
    }

    pub fn artifact_key(&self) -> Result<ArtifactKey, KeyError> {
        ArtifactKey::new(&self.file_hash, &self.file_ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5: &str = "9e107d9d372bb6826bd81d3542a419d6";

    #[test]
    fn merge_request_camel_case() {
        let json = format!(r#"{{"fileExt":"zip","fileHash":"{MD5}","chunkSize":1048576}}"#);
        let req: MergeChunksRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.file_ext, "zip");
        assert_eq!(req.chunk_size, 1_048_576);
        assert_eq!(req.chunk_count, None);
        assert_eq!(req.artifact_key().unwrap().file_name(), format!("{MD5}.zip"));
    }

    #[test]
    fn merge_request_omits_missing_count() {
        let req = MergeChunksRequest {
            file_ext: "bin".into(),
            file_hash: MD5.into(),
            chunk_size: 4,
            chunk_count: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("chunkCount"));
    }

    #[test]
    fn chunk_fields_roundtrip_key() {
        let key = ChunkKey::new(MD5, 8, MD5, 3).unwrap();
        let fields = UploadChunkFields::from(&key);
        assert_eq!(fields.chunk_key().unwrap(), key);
    }

    #[test]
    fn chunk_query_builds_key() {
        let query = ChunkQuery {
            chunk_index: 2,
            file_hash: MD5.into(),
            chunk_size: 16,
        };
        let key = query.chunk_key(MD5).unwrap();
        assert_eq!(key.chunk_index(), 2);
        assert_eq!(key.partition().chunk_size(), 16);
    }

    #[test]
    fn file_query_defaults_extension() {
        let query: FileQuery = serde_json::from_str("{}").unwrap();
        assert!(query.file_ext.is_empty());
    }
}
