//! Cross-node cancellation handshake.
//!
//! ```text
//! requester                         bus                           owner
//!    │ once_or_more(cancel_task_done) │                               │
//!    │ emit(cancel_task{task, owner}) ├──────────────────────────────►│ clusterId == mine?
//!    │                                │                               │ serializer.submit(cancel)
//!    │◄───────────────────────────────┤ emit(cancel_task_done{task})  │
//!    │ Leave, resolve                 │                               │
//! ```
//!
//! The requester registers its reply waiter before emitting, so a fast owner
//! cannot answer into the void. Without a reply within the timeout
//! [`CancelError::Timeout`] is returned. The waiter is removed whenever the
//! request ends, including when its future is dropped.
mod error;
mod local;

pub use error::CancelError;
pub use local::LocalTasks;

use std::{
    error::Error as _,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace, warn};

use nluq_model::{CancelTask, CancelTaskDone, JobId, RemoteError, RunSchedulerInterrupt};

use crate::{
    bus::{Disposition, HandlerError, QueueEventBus, SubscriptionId},
    config::QueueConfig,
    serializer::TaskSerializer,
};

/// Node-local capability that actually stops a running job.
#[async_trait]
pub trait LocalCanceller: Send + Sync + 'static {
    async fn cancel(&self, job: &JobId) -> Result<(), CancelError>;
}

/// Removes a reply waiter when the request that owns it ends.
struct WaiterGuard<'a> {
    bus: &'a QueueEventBus,
    id: SubscriptionId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.bus.off(self.id);
    }
}

/// Scheduler-side half of the cancellation protocol for one queue.
pub struct CancelCoordinator {
    bus: Arc<QueueEventBus>,
    cluster_id: String,
    local: Arc<dyn LocalCanceller>,
    serializer: Arc<TaskSerializer>,
    timeout: Duration,
}

impl CancelCoordinator {
    pub fn new(
        bus: Arc<QueueEventBus>,
        cluster_id: impl Into<String>,
        local: Arc<dyn LocalCanceller>,
        serializer: Arc<TaskSerializer>,
        timeout: Duration,
    ) -> Self {
        Self {
            bus,
            cluster_id: cluster_id.into(),
            local,
            serializer,
            timeout,
        }
    }

    pub fn from_config(
        bus: Arc<QueueEventBus>,
        cfg: &QueueConfig,
        local: Arc<dyn LocalCanceller>,
        serializer: Arc<TaskSerializer>,
    ) -> Self {
        Self::new(bus, cfg.cluster_id.clone(), local, serializer, cfg.cancel_timeout())
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn bus(&self) -> &Arc<QueueEventBus> {
        &self.bus
    }

    /// Answer `cancel_task` requests addressed to this node.
    ///
    /// The handler holds the coordinator weakly; once the coordinator is
    /// dropped it ignores further requests.
    #[instrument(level = "debug", skip(self), fields(cluster = %self.cluster_id))]
    pub fn start(self: &Arc<Self>) -> SubscriptionId {
        let this = Arc::downgrade(self);
        let id = self.bus.on(move |req: CancelTask| {
            let this = this.clone();
            async move {
                match this.upgrade() {
                    Some(this) => this.answer(req).await,
                    None => Ok(()),
                }
            }
        });
        debug!(subscription = %id, "cancel responder registered");
        id
    }

    async fn answer(&self, req: CancelTask) -> Result<(), HandlerError> {
        if req.cluster_id != self.cluster_id {
            trace!(task = %req.task_id, owner = %req.cluster_id, "cancel request for another node");
            return Ok(());
        }

        let outcome = match JobId::decode(&req.task_id) {
            Ok(job) => self.cancel_local(job).await,
            Err(e) => Err(e.into()),
        };
        let reply = match outcome {
            Ok(()) => {
                debug!(task = %req.task_id, "job cancelled on request");
                CancelTaskDone::ok(req.task_id)
            }
            Err(e) => {
                warn!(task = %req.task_id, error = %e, "cancel request failed");
                CancelTaskDone::failed(req.task_id, to_remote(&e))
            }
        };
        self.bus.emit(reply).await.map_err(HandlerError::new)
    }

    /// Cancel `job` on this node through the serializer.
    ///
    /// Must not be awaited from inside a task of the same serializer.
    pub async fn cancel_local(&self, job: JobId) -> Result<(), CancelError> {
        let local = Arc::clone(&self.local);
        self.serializer
            .submit_named(format!("cancel {job}"), move || async move { local.cancel(&job).await })
            .await
            .map_err(CancelError::from)
    }

    /// Ask `owner_cluster` to cancel `job` and wait for its reply.
    #[instrument(level = "debug", skip(self, job, owner_cluster), fields(task = %job, owner = owner_cluster))]
    pub async fn request_cancel(&self, job: &JobId, owner_cluster: &str) -> Result<(), CancelError> {
        if owner_cluster == self.cluster_id {
            return self.cancel_local(job.clone()).await;
        }

        let task_id = job.encode();
        let (tx, rx) = oneshot::channel::<Option<RemoteError>>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let expected = job.clone();

        let waiter = self.bus.once_or_more(move |done: CancelTaskDone| {
            let matched = JobId::decode(&done.task_id).is_ok_and(|id| id == expected);
            let slot = Arc::clone(&slot);
            async move {
                if !matched {
                    return Ok(Disposition::Stay);
                }
                let tx = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(tx) = tx {
                    let _ = tx.send(done.error);
                }
                Ok(Disposition::Leave)
            }
        });
        let _waiter = WaiterGuard {
            bus: &self.bus,
            id: waiter,
        };

        let request = CancelTask {
            task_id: task_id.clone(),
            cluster_id: owner_cluster.to_string(),
        };
        self.bus.emit(request).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(None)) => {
                debug!("remote cancel acknowledged");
                Ok(())
            }
            Ok(Ok(Some(err))) => Err(CancelError::Remote {
                message: err.message,
                stack: err.stack,
            }),
            Ok(Err(_)) => Err(CancelError::Aborted(task_id)),
            Err(_) => {
                warn!(after = ?self.timeout, "cancel request timed out");
                Err(CancelError::Timeout {
                    task_id,
                    after: self.timeout,
                })
            }
        }
    }

    /// Wake every scheduler listening on this queue.
    pub async fn interrupt_schedulers(&self) -> Result<(), CancelError> {
        self.bus.emit(RunSchedulerInterrupt).await?;
        Ok(())
    }

    /// Register a hook run on every scheduler interrupt.
    pub fn on_interrupt<F, Fut>(&self, hook: F) -> SubscriptionId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.bus.on(move |_: RunSchedulerInterrupt| hook())
    }
}

fn to_remote(err: &CancelError) -> RemoteError {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    let remote = RemoteError::new(err.to_string());
    if chain.is_empty() {
        remote
    } else {
        remote.with_stack(chain.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error as _,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use nluq_model::ModelId;

    use super::*;
    use crate::broker::MemoryHub;

    struct Node {
        bus: Arc<QueueEventBus>,
        tasks: Arc<LocalTasks>,
        coord: Arc<CancelCoordinator>,
    }

    async fn node(hub: &MemoryHub, cluster: &str, timeout: Duration) -> Node {
        let bus = Arc::new(QueueEventBus::new(Arc::new(hub.connect()), "training").unwrap());
        bus.initialize().await.unwrap();
        let tasks = Arc::new(LocalTasks::new());
        let coord = Arc::new(CancelCoordinator::new(
            Arc::clone(&bus),
            cluster,
            tasks.clone(),
            Arc::new(TaskSerializer::new()),
            timeout,
        ));
        coord.start();
        Node { bus, tasks, coord }
    }

    fn job(tenant: &str) -> JobId {
        let model = ModelId::new("0123456789abcdef", "fedcba9876543210", 7, "fr").unwrap();
        JobId::new(tenant, model).unwrap()
    }

    #[tokio::test]
    async fn remote_owner_cancels_and_replies() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_secs(2)).await;
        let b = node(&hub, "node-b", Duration::from_secs(2)).await;

        let token = b.tasks.register(job("acme"));
        a.coord.request_cancel(&job("acme"), "node-b").await.unwrap();

        assert!(token.is_cancelled());
        assert!(b.tasks.is_empty());
        // Only the responder is left; the waiter has gone.
        assert_eq!(a.bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn owner_matches_task_ids_regardless_of_hash_case() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_secs(2)).await;
        let b = node(&hub, "node-b", Duration::from_secs(2)).await;

        let upper = JobId::new(
            "acme",
            ModelId::new("0123456789ABCDEF", "FEDCBA9876543210", 7, "fr").unwrap(),
        )
        .unwrap();
        let token = b.tasks.register(upper);

        a.coord.request_cancel(&job("acme"), "node-b").await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn owner_failure_is_reported_as_remote_error() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_secs(2)).await;
        let _b = node(&hub, "node-b", Duration::from_secs(2)).await;

        let err = a
            .coord
            .request_cancel(&job("ghost"), "node-b")
            .await
            .unwrap_err();
        match err {
            CancelError::Remote { message, .. } => assert!(message.contains("not running")),
            other => panic!("expected Remote, got {other:?}"),
        }
        assert_eq!(a.bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn foreign_cluster_requests_are_ignored_and_requester_times_out() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_millis(100)).await;
        let b = node(&hub, "node-b", Duration::from_secs(2)).await;

        let token = b.tasks.register(job("acme"));
        let err = a
            .coord
            .request_cancel(&job("acme"), "node-c")
            .await
            .unwrap_err();

        assert!(matches!(err, CancelError::Timeout { ref task_id, .. } if *task_id == job("acme").encode()));
        assert!(!token.is_cancelled());
        assert!(b.tasks.is_running(&job("acme")));
        assert_eq!(a.bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn abandoned_requests_do_not_leave_waiters_behind() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_secs(5)).await;
        let baseline = a.bus.subscription_count();

        for _ in 0..10 {
            let abandoned = tokio::time::timeout(
                Duration::from_millis(10),
                a.coord.request_cancel(&job("acme"), "node-z"),
            )
            .await;
            assert!(abandoned.is_err());
        }
        assert_eq!(a.bus.subscription_count(), baseline);
    }

    #[tokio::test]
    async fn own_cluster_cancels_without_the_bus() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_secs(2)).await;

        let token = a.tasks.register(job("acme"));
        a.coord.request_cancel(&job("acme"), "node-a").await.unwrap();
        assert!(token.is_cancelled());

        let err = a
            .coord
            .request_cancel(&job("acme"), "node-a")
            .await
            .unwrap_err();
        assert!(matches!(err, CancelError::NotRunning(_)));
    }

    #[tokio::test]
    async fn teardown_aborts_pending_request() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_secs(5)).await;

        let coord = Arc::clone(&a.coord);
        let pending = tokio::spawn(async move {
            let target = job("acme");
            coord.request_cancel(&target, "node-z").await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        a.bus.teardown().await.unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CancelError::Aborted(_)));
    }

    #[tokio::test]
    async fn interrupt_wakes_every_node() {
        let hub = MemoryHub::new();
        let a = node(&hub, "node-a", Duration::from_secs(2)).await;
        let b = node(&hub, "node-b", Duration::from_secs(2)).await;

        let wakes = Arc::new(AtomicUsize::new(0));
        for n in [&a, &b] {
            let w = Arc::clone(&wakes);
            n.coord.on_interrupt(move || {
                let w = Arc::clone(&w);
                async move {
                    w.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        a.coord.interrupt_schedulers().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remote_error_carries_source_chain() {
        let err = CancelError::Model(nluq_model::ModelError::Invalid("bad tenant".into()));
        let remote = to_remote(&err);
        assert!(remote.message.starts_with("invalid task id"));
        assert_eq!(remote.stack.as_deref(), Some(err.source().unwrap().to_string().as_str()));

        let err = CancelError::Bus(crate::bus::BusError::Broker(
            crate::broker::BrokerError::Connection("reset".into()),
        ));
        let remote = to_remote(&err);
        assert_eq!(remote.message, "broker connection error: reset");
    }
}
