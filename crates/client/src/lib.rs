//! Resumable chunked upload client.
//!
//! [`Uploader`] drives the whole pipeline for a file: split and hash,
//! ask the server what it already has, upload the rest through a bounded
//! scheduler with retry rounds, then merge. [`HttpUploadApi`] is the reqwest
//! transport; any [`UploadApi`](slicedrop_transfer::UploadApi) works.

pub mod error;
pub mod http;
pub mod types;
pub mod uploader;

// Re-export primary types for convenience.
pub use error::ClientError;
pub use http::HttpUploadApi;
pub use types::{UploadEvent, UploadOutcome, UploaderConfig};
pub use uploader::Uploader;
