//! Upload pipeline for a single file.
//!
//! split -> negotiate -> upload missing chunks -> retry failures -> merge.
//! Progress is reported on an mpsc channel as [`UploadEvent`]s; the caller
//! must drain it or uploads stall once it is full.

use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use slicedrop_protocol::{ArtifactKey, ChunkStatus, FileStatus, MergeChunksRequest};
use slicedrop_transfer::{
    ChunkDescriptor, ChunkedFile, ResumeNegotiator, ResumePlan, UploadApi, UploadScheduler,
    UploadSession, UploadTask, calculate_file_checksum, file_extension, split_file,
};

use crate::error::ClientError;
use crate::types::{UploadEvent, UploadOutcome, UploaderConfig};

/// Uploads files to one server.
///
/// All uploads started from the same `Uploader` share one scheduler, so
/// `max_concurrent` bounds chunk uploads across files.
pub struct Uploader {
    api: Arc<dyn UploadApi>,
    config: UploaderConfig,
    scheduler: UploadScheduler,
    negotiator: ResumeNegotiator,
}

impl Uploader {
    pub fn new(api: Arc<dyn UploadApi>, config: UploaderConfig) -> Self {
        let scheduler = match config.task_timeout {
            Some(timeout) => UploadScheduler::with_task_timeout(config.max_concurrent, timeout),
            None => UploadScheduler::new(config.max_concurrent),
        };
        let negotiator =
            ResumeNegotiator::new(Arc::clone(&api)).with_parallelism(config.max_concurrent);
        Self {
            api,
            config,
            scheduler,
            negotiator,
        }
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &UploadScheduler {
        &self.scheduler
    }

    /// Stops admitting chunk uploads. Uploads in flight finish.
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Returns the href of `path` if the server already has it.
    pub async fn check(&self, path: &Path) -> Result<Option<String>, ClientError> {
        let algorithm = self.config.algorithm;
        let owned = path.to_path_buf();
        let hash =
            tokio::task::spawn_blocking(move || calculate_file_checksum(&owned, algorithm))
                .await??;
        let key = ArtifactKey::new(&hash, &file_extension(path))?;
        if !self.api.validate_file(key.clone()).await? {
            return Ok(None);
        }
        Ok(self.api.file_href(key).await?)
    }

    /// Uploads `path`, resuming whatever the server already holds.
    pub async fn upload_file(
        &self,
        path: &Path,
        events: mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, ClientError> {
        let file = Arc::new(self.split(path, &events).await?);
        let session = Arc::new(UploadSession::new(
            file.identity.clone(),
            file.chunks.len(),
        ));

        let result = self.run(&file, &session, &events).await;
        if let Err(e) = &result {
            let status = match e {
                ClientError::Merge(_) => FileStatus::MergeFailed,
                _ => FileStatus::UploadFailed,
            };
            session.fail(status, e.to_string());
            error!(path = %path.display(), error = %e, "upload failed");
            let _ = events.send(UploadEvent::Status(status)).await;
            let _ = events.send(UploadEvent::Progress(session.progress())).await;
        }
        result
    }

    async fn split(
        &self,
        path: &Path,
        events: &mpsc::Sender<UploadEvent>,
    ) -> Result<ChunkedFile, ClientError> {
        let path = path.to_path_buf();
        let chunk_size = self.config.chunk_size;
        let algorithm = self.config.algorithm;
        let events = events.clone();

        let file = tokio::task::spawn_blocking(move || {
            split_file(&path, chunk_size, algorithm, |chunk, index, total| {
                chunk.label = Some(format!("chunk {}/{}", index + 1, total));
                // Hashing must not wait on the receiver.
                let _ = events.try_send(UploadEvent::Hashed { index, total });
            })
        })
        .await??;
        Ok(file)
    }

    async fn run(
        &self,
        file: &Arc<ChunkedFile>,
        session: &Arc<UploadSession>,
        events: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, ClientError> {
        set_status(session, events, FileStatus::Validating).await;

        let (present, missing) = match self.negotiator.negotiate(file).await? {
            ResumePlan::Complete { href } => {
                for chunk in &file.chunks {
                    session.mark_present(chunk.index, chunk.len());
                }
                set_status(session, events, FileStatus::MergeSuccessful).await;
                return Ok(UploadOutcome {
                    href,
                    identity: file.identity.clone(),
                    uploaded_chunks: 0,
                    skipped_chunks: file.chunks.len(),
                    instant: true,
                });
            }
            ResumePlan::Upload { present, missing } => (present, missing),
        };

        for chunk in &present {
            session.mark_present(chunk.index, chunk.len());
        }
        if !present.is_empty() {
            let indices = present.iter().map(|c| c.index).collect();
            let _ = events.send(UploadEvent::Skipped { indices }).await;
        }

        set_status(session, events, FileStatus::Uploading).await;
        let uploaded_chunks = missing.len();
        self.upload_chunks(file, session, events, missing).await?;

        set_status(session, events, FileStatus::Merging).await;
        let request = MergeChunksRequest {
            file_ext: file.identity.file_ext.clone(),
            file_hash: file.identity.file_hash.clone(),
            chunk_size: file.chunk_size,
            chunk_count: Some(file.chunk_count()),
        };
        let href = self
            .api
            .merge_chunks(request)
            .await
            .map_err(|e| ClientError::Merge(e.to_string()))?
            .ok_or_else(|| ClientError::Merge("server returned no file link".into()))?;

        set_status(session, events, FileStatus::MergeSuccessful).await;
        let _ = events.send(UploadEvent::Progress(session.progress())).await;
        info!(
            file_hash = %file.identity.file_hash,
            %href,
            uploaded = uploaded_chunks,
            skipped = present.len(),
            elapsed_ms = session.elapsed().as_millis() as u64,
            "upload complete"
        );

        Ok(UploadOutcome {
            href,
            identity: file.identity.clone(),
            uploaded_chunks,
            skipped_chunks: present.len(),
            instant: false,
        })
    }

    /// Uploads `pending` through the scheduler, re-enqueueing failures for up
    /// to `max_retries` extra rounds.
    async fn upload_chunks(
        &self,
        file: &Arc<ChunkedFile>,
        session: &Arc<UploadSession>,
        events: &mpsc::Sender<UploadEvent>,
        mut pending: Vec<ChunkDescriptor>,
    ) -> Result<(), ClientError> {
        let mut attempt = 0u32;
        loop {
            let mut handles = Vec::with_capacity(pending.len());
            for chunk in pending {
                let task = self.chunk_task(file, session, events, &chunk)?;
                handles.push((chunk, self.scheduler.enqueue(task)));
            }

            let results = join_all(
                handles
                    .into_iter()
                    .map(|(chunk, handle)| async move { (chunk, handle.wait().await) }),
            )
            .await;

            let mut failed = Vec::new();
            let mut last_error = String::new();
            for (chunk, result) in results {
                let Err(e) = result else { continue };
                session.set_chunk_status(chunk.index, ChunkStatus::UploadFailed);
                warn!(index = chunk.index, attempt, error = %e, "chunk upload failed");
                last_error = e.to_string();
                let _ = events
                    .send(UploadEvent::ChunkFailed {
                        index: chunk.index,
                        attempt,
                        error: last_error.clone(),
                    })
                    .await;
                failed.push(chunk);
            }

            if failed.is_empty() {
                return Ok(());
            }
            if attempt >= self.config.max_retries {
                return Err(ClientError::ChunksFailed {
                    indices: failed.iter().map(|c| c.index).collect(),
                    last_error,
                });
            }
            attempt += 1;
            info!(chunks = failed.len(), attempt, "retrying failed chunks");
            pending = failed;
        }
    }

    fn chunk_task(
        &self,
        file: &Arc<ChunkedFile>,
        session: &Arc<UploadSession>,
        events: &mpsc::Sender<UploadEvent>,
        chunk: &ChunkDescriptor,
    ) -> Result<UploadTask, ClientError> {
        let key = file.chunk_key(chunk)?;
        let label = chunk.label.clone().unwrap_or_else(|| key.file_name());
        let api = Arc::clone(&self.api);
        let file = Arc::clone(file);
        let session = Arc::clone(session);
        let events = events.clone();
        let chunk = chunk.clone();

        Ok(UploadTask::new(label, move || async move {
            session.set_chunk_status(chunk.index, ChunkStatus::Uploading);
            let data = file.load(&chunk).await?;
            api.upload_chunk(key, data).await?;
            session.mark_uploaded(chunk.index, chunk.len());
            debug!(index = chunk.index, bytes = chunk.len(), "chunk uploaded");

            let _ = events
                .send(UploadEvent::ChunkUploaded {
                    index: chunk.index,
                    bytes: chunk.len(),
                })
                .await;
            let _ = events.send(UploadEvent::Progress(session.progress())).await;
            Ok(())
        }))
    }
}

async fn set_status(session: &UploadSession, events: &mpsc::Sender<UploadEvent>, status: FileStatus) {
    session.set_status(status);
    let _ = events.send(UploadEvent::Status(status)).await;
}
