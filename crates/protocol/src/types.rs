use serde::{Deserialize, Serialize};

/// Identity of a file being uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdentity {
    /// Content hash of the whole file.
    pub file_hash: String,
    /// Extension without the leading dot (may be empty).
    pub file_ext: String,
    /// Size in bytes.
    pub size: u64,
}

/// Upload status of a whole file, as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    NotSelected,
    NotUploaded,
    Validating,
    Uploading,
    UploadFailed,
    Merging,
    MergeSuccessful,
    MergeFailed,
}

impl FileStatus {
    /// Returns `true` once no further transitions are expected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::UploadFailed | Self::MergeSuccessful | Self::MergeFailed
        )
    }
}

/// Upload status of one chunk, as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkStatus {
    NotUploaded,
    Validating,
    Uploading,
    UploadSuccessful,
    UploadFailed,
}
