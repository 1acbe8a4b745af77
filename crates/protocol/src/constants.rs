/// Envelope code for a successful operation.
pub const CODE_SUCCESS: i32 = 200;

/// Envelope code for a failed operation.
pub const CODE_FAILURE: i32 = 500;

/// Directory (key prefix) holding chunk partitions.
pub const CHUNKS_DIR: &str = "chunks";

/// Directory (key prefix) holding merged artifacts.
pub const FILES_DIR: &str = "files";

/// Default URL prefix under which merged artifacts are served.
pub const DEFAULT_HREF_PREFIX: &str = "/files";

/// Maximum accepted length of a file extension.
pub const MAX_EXTENSION_LEN: usize = 16;

/// Upper bound on the number of chunks in one partition. Chunk indices are
/// always below it.
pub const MAX_CHUNK_COUNT: u64 = 1 << 32;

// Routes.
pub const ROUTE_UPLOAD_CHUNK: &str = "/upload/chunk";
pub const ROUTE_VALIDATE_FILE: &str = "/upload/validate-file";
pub const ROUTE_GET_FILE_HREF: &str = "/upload/get-file-href";
pub const ROUTE_VALIDATE_CHUNK: &str = "/upload/validate-chunk";
pub const ROUTE_MERGE_CHUNKS: &str = "/upload/merge-chunks";

// Multipart field names of a chunk upload.
pub const FIELD_CHUNK: &str = "chunk";
pub const FIELD_FILE_HASH: &str = "fileHash";
pub const FIELD_CHUNK_SIZE: &str = "chunkSize";
pub const FIELD_CHUNK_HASH: &str = "chunkHash";
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
