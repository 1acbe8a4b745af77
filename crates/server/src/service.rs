//! Protocol operations, independent of HTTP.

use std::sync::Arc;

use slicedrop_protocol::{
    ApiResponse, ArtifactKey, ChunkQuery, FileQuery, MergeChunksRequest, UploadChunkFields,
};
use slicedrop_store::{ChunkStore, MergeEngine, MergeOutcome};
use tracing::{debug, info, warn};

use crate::ServerError;

const MSG_CHUNK_UPLOADED: &str = "chunk uploaded";
const MSG_FILE_EXISTS: &str = "file exists";
const MSG_FILE_NOT_FOUND: &str = "file not found";
const MSG_HREF_FOUND: &str = "file link found";
const MSG_HREF_NOT_FOUND: &str = "file link not found";
const MSG_CHUNK_EXISTS: &str = "chunk exists";
const MSG_CHUNK_NOT_FOUND: &str = "chunk not found";
const MSG_MERGED: &str = "chunks merged";
const MSG_ALREADY_MERGED: &str = "file already exists";

/// Upload protocol operations.
///
/// Every method returns an envelope; failures become `code=500` with the
/// error's message and are logged here.
pub struct UploadService {
    store: Arc<dyn ChunkStore>,
    merger: MergeEngine,
    href_prefix: String,
}

impl UploadService {
    pub fn new(store: Arc<dyn ChunkStore>, href_prefix: impl Into<String>) -> Self {
        Self {
            merger: MergeEngine::new(Arc::clone(&store)),
            store,
            href_prefix: href_prefix.into(),
        }
    }

    pub fn href_prefix(&self) -> &str {
        &self.href_prefix
    }

    /// Stores one chunk. Re-uploading a stored chunk succeeds.
    pub async fn upload_chunk(&self, fields: &UploadChunkFields, data: Vec<u8>) -> ApiResponse<()> {
        let result = async {
            let key = fields.chunk_key()?;
            let outcome = self.store.put_chunk(&key, data).await?;
            debug!(chunk = %key, ?outcome, "chunk upload handled");
            Ok::<_, ServerError>(ApiResponse::ok_empty(MSG_CHUNK_UPLOADED))
        }
        .await;
        respond("upload chunk", result)
    }

    pub async fn validate_file(&self, file_hash: &str, query: &FileQuery) -> ApiResponse<bool> {
        let result = async {
            let key = ArtifactKey::new(file_hash, &query.file_ext)?;
            Ok::<_, ServerError>(if self.store.artifact_exists(&key).await? {
                ApiResponse::ok(true, MSG_FILE_EXISTS)
            } else {
                ApiResponse::ok(false, MSG_FILE_NOT_FOUND)
            })
        }
        .await;
        respond("validate file", result)
    }

    /// Returns the artifact's href, or `data: null` if it does not exist.
    pub async fn file_href(&self, file_hash: &str, query: &FileQuery) -> ApiResponse<String> {
        let result = async {
            let key = ArtifactKey::new(file_hash, &query.file_ext)?;
            Ok::<_, ServerError>(if self.store.artifact_exists(&key).await? {
                ApiResponse::ok(key.href(&self.href_prefix), MSG_HREF_FOUND)
            } else {
                ApiResponse::ok_empty(MSG_HREF_NOT_FOUND)
            })
        }
        .await;
        respond("get file href", result)
    }

    pub async fn validate_chunk(&self, chunk_hash: &str, query: &ChunkQuery) -> ApiResponse<bool> {
        let result = async {
            let key = query.chunk_key(chunk_hash)?;
            Ok::<_, ServerError>(if self.store.chunk_exists(&key).await? {
                ApiResponse::ok(true, MSG_CHUNK_EXISTS)
            } else {
                ApiResponse::ok(false, MSG_CHUNK_NOT_FOUND)
            })
        }
        .await;
        respond("validate chunk", result)
    }

    pub async fn merge_chunks(&self, request: &MergeChunksRequest) -> ApiResponse<String> {
        let result = async {
            let partition = request.partition_key()?;
            let outcome = self
                .merger
                .merge(&partition, &request.file_ext, request.chunk_count)
                .await?;
            let href = outcome.artifact().href(&self.href_prefix);
            Ok::<_, ServerError>(match outcome {
                MergeOutcome::Merged { bytes, .. } => {
                    info!(%href, bytes, "file merged");
                    ApiResponse::ok(href, MSG_MERGED)
                }
                MergeOutcome::AlreadyExists { .. } => ApiResponse::ok(href, MSG_ALREADY_MERGED),
            })
        }
        .await;
        respond("merge chunks", result)
    }
}

fn respond<T>(operation: &str, result: Result<ApiResponse<T>, ServerError>) -> ApiResponse<T> {
    result.unwrap_or_else(|e| {
        warn!(operation, error = %e, "request failed");
        ApiResponse::failure(e.to_string())
    })
}

/// Used by the router for requests that fail before reaching the service.
pub(crate) fn reject<T>(operation: &str, error: ServerError) -> ApiResponse<T> {
    respond(operation, Err(error))
}

impl std::fmt::Debug for UploadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadService")
            .field("backend", &self.store.backend_name())
            .field("href_prefix", &self.href_prefix)
            .finish()
    }
}
