//! Route configuration and HTTP handlers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use slicedrop_protocol::constants::{
    DEFAULT_HREF_PREFIX, FIELD_CHUNK, FIELD_CHUNK_HASH, FIELD_CHUNK_INDEX, FIELD_CHUNK_SIZE,
    FIELD_FILE_HASH, ROUTE_GET_FILE_HREF, ROUTE_MERGE_CHUNKS, ROUTE_UPLOAD_CHUNK,
    ROUTE_VALIDATE_CHUNK, ROUTE_VALIDATE_FILE,
};
use slicedrop_protocol::{ApiResponse, ChunkQuery, FileQuery, MergeChunksRequest, UploadChunkFields};

use crate::service::{UploadService, reject};
use crate::{FORM_OVERHEAD_BYTES, ServerError};

/// Options for [`create_router`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// URL prefix merged files are served under.
    pub href_prefix: String,
    /// Directory of merged files. `None` disables static serving.
    pub files_dir: Option<PathBuf>,
    /// Largest accepted chunk payload.
    pub max_chunk_bytes: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            href_prefix: DEFAULT_HREF_PREFIX.to_string(),
            files_dir: None,
            max_chunk_bytes: 64 * 1024 * 1024,
        }
    }
}

type Envelope<T> = Json<ApiResponse<T>>;

/// Create the application router.
pub fn create_router(service: Arc<UploadService>, options: &RouterOptions) -> Router {
    let body_limit = options.max_chunk_bytes.saturating_add(FORM_OVERHEAD_BYTES);

    let router = Router::new()
        .route(
            ROUTE_UPLOAD_CHUNK,
            post(upload_chunk).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            &format!("{ROUTE_VALIDATE_FILE}/{{file_hash}}"),
            get(validate_file),
        )
        .route(
            &format!("{ROUTE_GET_FILE_HREF}/{{file_hash}}"),
            get(get_file_href),
        )
        .route(
            &format!("{ROUTE_VALIDATE_CHUNK}/{{chunk_hash}}"),
            get(validate_chunk),
        )
        .route(ROUTE_MERGE_CHUNKS, post(merge_chunks))
        .with_state(service);

    let router = match &options.files_dir {
        Some(dir) => {
            let prefix = options.href_prefix.trim_end_matches('/');
            // axum cannot nest at the root.
            if prefix.is_empty() {
                router.fallback_service(ServeDir::new(dir))
            } else {
                router.nest_service(prefix, ServeDir::new(dir))
            }
        }
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

fn envelope<T: Serialize>(response: ApiResponse<T>) -> Envelope<T> {
    Json(response)
}

/// POST /upload/chunk - multipart form with the chunk bytes and its key fields.
async fn upload_chunk(
    State(service): State<Arc<UploadService>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Envelope<()> {
    let form = match multipart {
        Ok(multipart) => read_chunk_form(multipart).await,
        Err(rejection) => Err(ServerError::BadRequest(rejection.body_text())),
    };
    match form {
        Ok((fields, data)) => envelope(service.upload_chunk(&fields, data).await),
        Err(e) => envelope(reject("upload chunk", e)),
    }
}

/// Reads the chunk form. Fields may arrive in any order; unknown ones are skipped.
async fn read_chunk_form(
    mut multipart: Multipart,
) -> Result<(UploadChunkFields, Vec<u8>), ServerError> {
    let mut chunk = None;
    let mut file_hash = None;
    let mut chunk_hash = None;
    let mut chunk_size = None;
    let mut chunk_index = None;

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FIELD_CHUNK => chunk = Some(field.bytes().await.map_err(form_error)?.to_vec()),
            FIELD_FILE_HASH => file_hash = Some(field.text().await.map_err(form_error)?),
            FIELD_CHUNK_HASH => chunk_hash = Some(field.text().await.map_err(form_error)?),
            FIELD_CHUNK_SIZE => {
                let text = field.text().await.map_err(form_error)?;
                chunk_size = Some(parse_number(FIELD_CHUNK_SIZE, &text)?);
            }
            FIELD_CHUNK_INDEX => {
                let text = field.text().await.map_err(form_error)?;
                chunk_index = Some(parse_number(FIELD_CHUNK_INDEX, &text)?);
            }
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    let fields = UploadChunkFields {
        file_hash: required(FIELD_FILE_HASH, file_hash)?,
        chunk_size: required(FIELD_CHUNK_SIZE, chunk_size)?,
        chunk_hash: required(FIELD_CHUNK_HASH, chunk_hash)?,
        chunk_index: required(FIELD_CHUNK_INDEX, chunk_index)?,
    };
    Ok((fields, required(FIELD_CHUNK, chunk)?))
}

fn form_error(e: MultipartError) -> ServerError {
    ServerError::BadRequest(e.body_text())
}

fn parse_number(field: &str, text: &str) -> Result<u64, ServerError> {
    text.trim()
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("{field} is not a number: {text:?}")))
}

fn required<T>(field: &str, value: Option<T>) -> Result<T, ServerError> {
    value.ok_or_else(|| ServerError::BadRequest(format!("missing form field: {field}")))
}

/// GET /upload/validate-file/{fileHash}?fileExt=
async fn validate_file(
    State(service): State<Arc<UploadService>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Envelope<bool> {
    match file_request(path, query) {
        Ok((hash, query)) => envelope(service.validate_file(&hash, &query).await),
        Err(e) => envelope(reject("validate file", e)),
    }
}

/// GET /upload/get-file-href/{fileHash}?fileExt=
async fn get_file_href(
    State(service): State<Arc<UploadService>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Envelope<String> {
    match file_request(path, query) {
        Ok((hash, query)) => envelope(service.file_href(&hash, &query).await),
        Err(e) => envelope(reject("get file href", e)),
    }
}

fn file_request(
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<(String, FileQuery), ServerError> {
    let Path(hash) = path.map_err(|r| ServerError::BadRequest(r.body_text()))?;
    let Query(query) = query.map_err(|r| ServerError::BadRequest(r.body_text()))?;
    Ok((hash, query))
}

/// GET /upload/validate-chunk/{chunkHash}?chunkIndex=&fileHash=&chunkSize=
async fn validate_chunk(
    State(service): State<Arc<UploadService>>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
) -> Envelope<bool> {
    let request = path
        .map_err(|r| ServerError::BadRequest(r.body_text()))
        .and_then(|Path(hash)| {
            let Query(query) = query.map_err(|r| ServerError::BadRequest(r.body_text()))?;
            Ok((hash, query))
        });
    match request {
        Ok((hash, query)) => envelope(service.validate_chunk(&hash, &query).await),
        Err(e) => envelope(reject("validate chunk", e)),
    }
}

/// POST /upload/merge-chunks - JSON body.
async fn merge_chunks(
    State(service): State<Arc<UploadService>>,
    body: Result<Json<MergeChunksRequest>, JsonRejection>,
) -> Envelope<String> {
    match body {
        Ok(Json(request)) => envelope(service.merge_chunks(&request).await),
        Err(rejection) => envelope(reject(
            "merge chunks",
            ServerError::BadRequest(rejection.body_text()),
        )),
    }
}
