//! Single-flight FIFO task queue.
//!
//! [`TaskSerializer`] runs submitted async operations strictly one at a time, in
//! submission order. It replaces a mutex around shared bookkeeping: callers do
//! not check whether the resource is free, their operation simply runs when its
//! turn comes.
//!
//! ## Architecture
//! ```text
//! submit(task) ──► [unbounded queue] ──► worker ──► job().await ──► oneshot ──► caller
//! submit(task) ──┘                      (single)
//! ```
//!
//! ## Rules
//! - **FIFO**: the job is enqueued when `submit` is called, not when its future is first polled.
//! - **Mutual exclusion**: one worker awaits each job to completion before taking the next.
//! - **Isolation**: an error or a panic resolves only that job's future; the worker keeps draining.
//! - **Detached**: dropping the returned future does not cancel an enqueued job.
//! - **Named**: every task carries a name used in its `waiting`/`started`/`done` log lines.
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

/// Outcome of a submitted task other than success.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The task returned its own error.
    #[error("task failed: {0}")]
    Failed(E),

    /// The task panicked; the panic was contained.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The worker is gone (runtime shut down) and the task will never run.
    #[error("task serializer is closed")]
    Closed,
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

const DEFAULT_TASK_NAME: &str = "task";

/// Per-process single-flight queue. Must be created inside a tokio runtime.
pub struct TaskSerializer {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl TaskSerializer {
    /// Create the queue and spawn its worker.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job().await;
            }
            trace!("task serializer worker stopped");
        });

        Self {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of submitted tasks that have not finished yet (including the running one).
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Enqueue `task` and return a future resolving with its result.
    ///
    /// The task is admitted immediately; awaiting the returned future only waits for its outcome.
    pub fn submit<F, Fut, T, E>(
        &self,
        task: F,
    ) -> impl Future<Output = Result<T, TaskError<E>>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_named(DEFAULT_TASK_NAME, task)
    }

    /// Like [`submit`](Self::submit), logging the task's lifecycle under `name`.
    pub fn submit_named<F, Fut, T, E>(
        &self,
        name: impl Into<String>,
        task: F,
    ) -> impl Future<Output = Result<T, TaskError<E>>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let name = name.into();
        let (done_tx, done_rx) = oneshot::channel();
        let pending = Arc::clone(&self.pending);
        let queued = pending.fetch_add(1, Ordering::AcqRel);
        debug!(task = %name, ahead = queued, "task waiting");

        let job: Job = Box::new(move || {
            async move {
                debug!(task = %name, "task started");
                let outcome = AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await;
                pending.fetch_sub(1, Ordering::AcqRel);

                let result = match outcome {
                    Ok(Ok(value)) => {
                        debug!(task = %name, "task done");
                        Ok(value)
                    }
                    Ok(Err(e)) => {
                        debug!(task = %name, "task done with error");
                        Err(TaskError::Failed(e))
                    }
                    Err(panic) => {
                        let msg = panic_message(panic);
                        error!(task = %name, reason = %msg, "serialized task panicked");
                        Err(TaskError::Panicked(msg))
                    }
                };
                // The caller may have stopped waiting.
                let _ = done_tx.send(result);
            }
            .boxed()
        });

        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }

        async move { done_rx.await.unwrap_or(Err(TaskError::Closed)) }
    }
}

impl Default for TaskSerializer {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
