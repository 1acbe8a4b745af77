//! Server-side storage for slicedrop uploads.
//!
//! This crate provides:
//! - The [`ChunkStore`] abstraction: idempotent chunk writes, existence
//!   checks that re-verify content, per-partition listing and atomic
//!   artifact publishing
//! - Backends: local filesystem and in-memory
//! - The [`MergeEngine`], which reassembles a partition into its artifact

pub mod backends;
pub mod error;
pub mod merge;
pub mod traits;

pub use backends::{filesystem::FilesystemStore, memory::MemoryStore};
pub use error::{StoreError, StoreResult};
pub use merge::{MergeEngine, MergeOutcome};
pub use traits::{ArtifactWriter, ChunkStore, PutOutcome, StoreFuture, StoredChunk};
