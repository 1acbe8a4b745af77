//! Bounded-concurrency, pausable upload task runner.
//!
//! Admission is greedy FIFO: while the queue is non-empty, fewer than
//! `max_concurrent` tasks are in flight and the scheduler is not paused, the
//! head task is started. Every completion (success or failure) releases its
//! slot and drains again. Pausing only stops admissions; in-flight tasks run
//! to completion. Failed tasks are reported through their [`TaskHandle`] and
//! never retried here.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{Notify, oneshot, watch};
use tracing::{debug, warn};

use crate::{DEFAULT_MAX_CONCURRENT, TransferError};

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'static>>;

/// A unit of upload work: a label plus a factory for the future to run.
///
/// The future is only created when the task is admitted.
pub struct UploadTask {
    label: String,
    run: Box<dyn FnOnce() -> TaskFuture + Send>,
}

impl UploadTask {
    pub fn new<F, Fut>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TransferError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(move || Box::pin(run())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Lifecycle of an enqueued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// Caller's view of an enqueued task.
pub struct TaskHandle {
    label: String,
    state: watch::Receiver<TaskState>,
    result: oneshot::Receiver<Result<(), TransferError>>,
}

impl TaskHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state of the task.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Waits for the task to finish and returns its result.
    pub async fn wait(self) -> Result<(), TransferError> {
        self.result.await.unwrap_or(Err(TransferError::Cancelled))
    }
}

struct QueuedTask {
    task: UploadTask,
    state: watch::Sender<TaskState>,
    result: oneshot::Sender<Result<(), TransferError>>,
}

struct SchedulerState {
    queue: VecDeque<QueuedTask>,
    in_flight: usize,
    paused: bool,
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    max_concurrent: usize,
    task_timeout: Option<Duration>,
    idle: Notify,
}

/// Bounded-concurrency upload scheduler.
///
/// Cheap to clone; clones share the same queue. Tasks are spawned on the
/// ambient tokio runtime, so `enqueue` and `resume` must be called from
/// within one.
#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for UploadScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl UploadScheduler {
    /// Creates a scheduler running at most `max_concurrent` tasks (min 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self::build(max_concurrent, None)
    }

    /// Like [`new`](Self::new), failing any task that runs longer than `timeout`.
    pub fn with_task_timeout(max_concurrent: usize, timeout: Duration) -> Self {
        Self::build(max_concurrent, Some(timeout))
    }

    fn build(max_concurrent: usize, task_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState {
                    queue: VecDeque::new(),
                    in_flight: 0,
                    paused: false,
                }),
                max_concurrent: max_concurrent.max(1),
                task_timeout,
                idle: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a task and starts it if a slot is free and not paused.
    pub fn enqueue(&self, task: UploadTask) -> TaskHandle {
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        let (result_tx, result_rx) = oneshot::channel();
        let handle = TaskHandle {
            label: task.label.clone(),
            state: state_rx,
            result: result_rx,
        };

        self.lock().queue.push_back(QueuedTask {
            task,
            state: state_tx,
            result: result_tx,
        });
        self.drain();
        handle
    }

    /// Stops admitting new tasks. In-flight tasks keep running.
    pub fn pause(&self) {
        self.lock().paused = true;
        debug!("scheduler paused");
    }

    /// Clears the pause flag and admits queued tasks immediately.
    pub fn resume(&self) {
        self.lock().paused = false;
        debug!("scheduler resumed");
        self.drain();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Number of queued tasks not yet started.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Waits until nothing is queued or running.
    ///
    /// While paused with a non-empty queue this only returns after `resume`.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn is_idle(&self) -> bool {
        let s = self.lock();
        s.queue.is_empty() && s.in_flight == 0
    }

    fn drain(&self) {
        let mut admitted = Vec::new();
        {
            let mut s = self.lock();
            while !s.paused && s.in_flight < self.inner.max_concurrent {
                let Some(task) = s.queue.pop_front() else {
                    break;
                };
                s.in_flight += 1;
                admitted.push(task);
            }
        }
        for task in admitted {
            self.start(task);
        }
    }

    fn start(&self, queued: QueuedTask) {
        let QueuedTask {
            task,
            state,
            result,
        } = queued;
        state.send_replace(TaskState::InFlight);

        let scheduler = self.clone();
        let timeout = self.inner.task_timeout;
        tokio::spawn(async move {
            let label = task.label;
            let fut = guard_panics((task.run)());
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(r) => r,
                    Err(_) => Err(TransferError::Timeout(limit)),
                },
                None => fut.await,
            };

            match &outcome {
                Ok(()) => {
                    debug!(task = %label, "upload task done");
                    state.send_replace(TaskState::Done);
                }
                Err(e) => {
                    warn!(task = %label, error = %e, "upload task failed");
                    state.send_replace(TaskState::Failed);
                }
            }
            let _ = result.send(outcome);
            scheduler.complete();
        });
    }

    fn complete(&self) {
        {
            let mut s = self.lock();
            s.in_flight = s.in_flight.saturating_sub(1);
        }
        self.drain();
        if self.is_idle() {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Runs `fut`, turning a panic into a failed task so its slot is released.
async fn guard_panics(fut: TaskFuture) -> Result<(), TransferError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(TransferError::Cancelled),
    }
}
