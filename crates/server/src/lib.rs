//! HTTP server for slicedrop uploads.
//!
//! [`UploadService`] implements the five protocol operations on top of a
//! [`ChunkStore`](slicedrop_store::ChunkStore) and turns every outcome into
//! a `{code, data, message}` envelope. [`create_router`] exposes it over
//! axum, and [`UploadServer`] owns the listener lifecycle.

mod routes;
mod server;
mod service;

pub use routes::{RouterOptions, create_router};
pub use server::{ServerConfig, UploadServer};
pub use service::UploadService;

/// Room left in a chunk upload body for the multipart framing and fields.
pub const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    Key(#[from] slicedrop_protocol::KeyError),

    #[error(transparent)]
    Store(#[from] slicedrop_store::StoreError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server already running")]
    AlreadyRunning,
}
