use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use nluq_model::JobId;

use super::{CancelError, LocalCanceller};

/// Jobs running on this node, each with the token its worker watches.
#[derive(Default)]
pub struct LocalTasks {
    tasks: Mutex<HashMap<JobId, CancellationToken>>,
}

impl LocalTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `job` as running and return the token to watch.
    ///
    /// Registering a job that is already running cancels the previous token.
    pub fn register(&self, job: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(prev) = self.lock().insert(job.clone(), token.clone()) {
            debug!(task = %job, "job re-registered, cancelling previous run");
            prev.cancel();
        }
        token
    }

    /// Forget a job that finished on its own. Returns `false` if it was unknown.
    pub fn complete(&self, job: &JobId) -> bool {
        self.lock().remove(job).is_some()
    }

    pub fn is_running(&self, job: &JobId) -> bool {
        self.lock().contains_key(job)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LocalCanceller for LocalTasks {
    async fn cancel(&self, job: &JobId) -> Result<(), CancelError> {
        let token = self.lock().remove(job);
        match token {
            Some(token) => {
                token.cancel();
                trace!(task = %job, "local job cancelled");
                Ok(())
            }
            None => Err(CancelError::NotRunning(job.encode())),
        }
    }
}
