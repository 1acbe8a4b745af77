use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::api::UploadApi;
use crate::chunked::{ChunkDescriptor, ChunkedFile};
use crate::{DEFAULT_MAX_CONCURRENT, TransferError};

/// What still has to happen for a file to reach the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePlan {
    /// The merged artifact already exists; nothing to upload.
    Complete { href: String },
    /// Chunks split by whether the server already holds them, each list in
    /// index order.
    Upload {
        present: Vec<ChunkDescriptor>,
        missing: Vec<ChunkDescriptor>,
    },
}

impl ResumePlan {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// Chunks that must be uploaded.
    pub fn missing(&self) -> &[ChunkDescriptor] {
        match self {
            Self::Complete { .. } => &[],
            Self::Upload { missing, .. } => missing,
        }
    }
}

/// Works out which parts of a file the server already has.
///
/// Not transactional: another uploader may store the same chunks between
/// the check and our upload, which is harmless because chunk writes are
/// idempotent.
pub struct ResumeNegotiator {
    api: Arc<dyn UploadApi>,
    parallelism: usize,
}

impl ResumeNegotiator {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self {
            api,
            parallelism: DEFAULT_MAX_CONCURRENT,
        }
    }

    /// Sets how many chunk checks may be outstanding at once (min 1).
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub async fn negotiate(&self, file: &ChunkedFile) -> Result<ResumePlan, TransferError> {
        let artifact = file.artifact_key()?;
        if self.api.validate_file(artifact.clone()).await? {
            // The artifact can vanish between the two calls; fall back to a
            // chunk check in that case.
            if let Some(href) = self.api.file_href(artifact.clone()).await? {
                info!(artifact = %artifact, %href, "file already on server");
                return Ok(ResumePlan::Complete { href });
            }
        }

        let keys = file
            .chunks
            .iter()
            .map(|chunk| file.chunk_key(chunk))
            .collect::<Result<Vec<_>, _>>()?;

        let api = &self.api;
        let checks: Vec<bool> = stream::iter(keys)
            .map(|key| async move {
                match api.validate_chunk(key.clone()).await {
                    Ok(exists) => exists,
                    Err(e) => {
                        warn!(chunk = %key, error = %e, "chunk check failed, treating as missing");
                        false
                    }
                }
            })
            .buffered(self.parallelism)
            .collect()
            .await;

        let mut present = Vec::new();
        let mut missing = Vec::new();
        for (chunk, exists) in file.chunks.iter().zip(checks) {
            if exists {
                present.push(chunk.clone());
            } else {
                missing.push(chunk.clone());
            }
        }

        debug!(
            file_hash = %file.identity.file_hash,
            present = present.len(),
            missing = missing.len(),
            "resume negotiated"
        );
        Ok(ResumePlan::Upload { present, missing })
    }
}
