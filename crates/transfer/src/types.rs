use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use slicedrop_protocol::{ChunkStatus, FileIdentity, FileStatus};

/// Point-in-time view of an [`UploadSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProgress {
    pub status: FileStatus,
    pub total_bytes: u64,
    /// Bytes accounted for, whether uploaded now or already on the server.
    pub completed_bytes: u64,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    pub total_chunks: usize,
    /// Bytes per second actually sent over the network.
    pub bytes_per_second: f64,
    pub error: Option<String>,
}

impl SessionProgress {
    /// Completion in percent (0-100). An empty file is 100% once merged.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.status == FileStatus::MergeSuccessful {
                100.0
            } else {
                0.0
            };
        }
        self.completed_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Client-side state of one file upload (thread-safe).
pub struct UploadSession {
    inner: RwLock<SessionInner>,
}

struct SessionInner {
    identity: FileIdentity,
    status: FileStatus,
    chunks: Vec<ChunkStatus>,
    completed_bytes: u64,
    sent_bytes: u64,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    error: Option<String>,
}

impl UploadSession {
    pub fn new(identity: FileIdentity, chunk_count: usize) -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                identity,
                status: FileStatus::NotUploaded,
                chunks: vec![ChunkStatus::NotUploaded; chunk_count],
                completed_bytes: 0,
                sent_bytes: 0,
                started_at: None,
                finished_at: None,
                error: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the file to `status`. Entering `Uploading` starts the clock.
    pub fn set_status(&self, status: FileStatus) {
        let mut s = self.write();
        s.status = status;
        if status == FileStatus::Uploading && s.started_at.is_none() {
            s.started_at = Some(Instant::now());
        }
        if status.is_terminal() {
            s.finished_at = Some(Instant::now());
        }
    }

    /// Records a terminal failure.
    pub fn fail(&self, status: FileStatus, error: impl Into<String>) {
        self.set_status(status);
        self.write().error = Some(error.into());
    }

    pub fn set_chunk_status(&self, index: u64, status: ChunkStatus) {
        let Ok(i) = usize::try_from(index) else {
            return;
        };
        if let Some(slot) = self.write().chunks.get_mut(i) {
            *slot = status;
        }
    }

    /// Marks a chunk the server already had. Counts toward completion but
    /// not toward transfer speed.
    pub fn mark_present(&self, index: u64, bytes: u64) {
        self.finish_chunk(index, bytes, false);
    }

    /// Marks a chunk uploaded by this session.
    pub fn mark_uploaded(&self, index: u64, bytes: u64) {
        self.finish_chunk(index, bytes, true);
    }

    fn finish_chunk(&self, index: u64, bytes: u64, sent: bool) {
        let Ok(i) = usize::try_from(index) else {
            return;
        };
        let mut guard = self.write();
        let s = &mut *guard;
        let Some(slot) = s.chunks.get_mut(i) else {
            return;
        };
        // A chunk retried after success must not be counted twice.
        if *slot == ChunkStatus::UploadSuccessful {
            return;
        }
        *slot = ChunkStatus::UploadSuccessful;
        s.completed_bytes += bytes;
        if sent {
            s.sent_bytes += bytes;
        }
    }

    pub fn status(&self) -> FileStatus {
        self.read().status
    }

    pub fn chunk_status(&self, index: u64) -> Option<ChunkStatus> {
        let s = self.read();
        usize::try_from(index).ok().and_then(|i| s.chunks.get(i).copied())
    }

    pub fn identity(&self) -> FileIdentity {
        self.read().identity.clone()
    }

    /// Time spent since uploading began, frozen once the session ends.
    pub fn elapsed(&self) -> Duration {
        let s = self.read();
        match (s.started_at, s.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn progress(&self) -> SessionProgress {
        let elapsed = self.elapsed().as_secs_f64();
        let s = self.read();
        let count = |status| s.chunks.iter().filter(|c| **c == status).count();
        SessionProgress {
            status: s.status,
            total_bytes: s.identity.size,
            completed_bytes: s.completed_bytes,
            completed_chunks: count(ChunkStatus::UploadSuccessful),
            failed_chunks: count(ChunkStatus::UploadFailed),
            total_chunks: s.chunks.len(),
            bytes_per_second: if elapsed > 0.0 {
                s.sent_bytes as f64 / elapsed
            } else {
                0.0
            },
            error: s.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_identity(size: u64) -> FileIdentity {
        FileIdentity {
            file_hash: "9e107d9d372bb6826bd81d3542a419d6".into(),
            file_ext: "mp4".into(),
            size,
        }
    }

    #[test]
    fn new_session_is_not_uploaded() {
        let session = UploadSession::new(sample_identity(3072), 3);
        assert_eq!(session.status(), FileStatus::NotUploaded);
        assert_eq!(session.chunk_status(0), Some(ChunkStatus::NotUploaded));
        assert_eq!(session.chunk_status(3), None);
        assert_eq!(session.elapsed(), Duration::ZERO);
    }

    #[test]
    fn present_and_uploaded_chunks_count_toward_completion() {
        let session = UploadSession::new(sample_identity(3072), 3);
        session.set_status(FileStatus::Uploading);
        session.mark_present(0, 1024);
        session.mark_uploaded(1, 1024);

        let p = session.progress();
        assert_eq!(p.completed_bytes, 2048);
        assert_eq!(p.completed_chunks, 2);
        assert!((p.percentage() - 66.666).abs() < 0.01);
    }

    #[test]
    fn uploaded_chunk_is_not_double_counted() {
        let session = UploadSession::new(sample_identity(2048), 2);
        session.mark_uploaded(1, 1024);
        session.mark_uploaded(1, 1024);
        assert_eq!(session.progress().completed_bytes, 1024);
    }

    #[test]
    fn failed_chunks_are_reported() {
        let session = UploadSession::new(sample_identity(2048), 2);
        session.set_chunk_status(0, ChunkStatus::UploadFailed);
        session.set_chunk_status(9, ChunkStatus::UploadFailed);
        assert_eq!(session.progress().failed_chunks, 1);
    }

    #[test]
    fn fail_records_error_and_stops_clock() {
        let session = UploadSession::new(sample_identity(10), 1);
        session.set_status(FileStatus::Uploading);
        session.fail(FileStatus::MergeFailed, "chunks missing: 0");

        let p = session.progress();
        assert_eq!(p.status, FileStatus::MergeFailed);
        assert_eq!(p.error.as_deref(), Some("chunks missing: 0"));
        let frozen = session.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(session.elapsed(), frozen);
    }

    #[test]
    fn empty_file_is_complete_only_when_merged() {
        let session = UploadSession::new(sample_identity(0), 0);
        assert_eq!(session.progress().percentage(), 0.0);
        session.set_status(FileStatus::MergeSuccessful);
        assert_eq!(session.progress().percentage(), 100.0);
    }

    #[test]
    fn concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let session = Arc::new(UploadSession::new(sample_identity(1000), 1000));
        session.set_status(FileStatus::Uploading);

        let mut handles = vec![];
        for t in 0..10u64 {
            let s = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    s.mark_uploaded(t * 100 + j, 1);
                }
            }));
        }
        for _ in 0..10 {
            let s = Arc::clone(&session);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _ = s.progress();
                    let _ = s.status();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(session.progress().completed_bytes, 1000);
    }
}
