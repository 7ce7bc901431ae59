//! Typed multi-channel event bus bound to one logical queue.
//!
//! A [`QueueEventBus`] namespaces the three queue channels under its queue id
//! (`"{queue_id}:{kind}"`) on a shared [`Broker`] connection and fans each
//! delivered event out to the handlers registered locally for that channel.
//!
//! ## Architecture
//! ```text
//! broker callback ──► [per-channel queue] ──► dispatcher ──► handler 1 ──► handler 2 ──► ...
//!   (sync, push only)                          (one per channel, sequential, registration order)
//! ```
//!
//! ## Rules
//! - A handler registered while an event is being dispatched does not see that event.
//! - A handler removed while an event is being dispatched is skipped.
//! - Handler errors and panics are logged and count as [`Disposition::Stay`].
//! - [`QueueEventBus::once_or_more`] handlers leave by returning [`Disposition::Leave`].
mod dispatch;
mod error;
mod registry;

pub use error::{BusError, HandlerError};
pub use registry::{Disposition, SubscriptionId};

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, instrument, trace, warn};

use nluq_model::{CHANNEL_SEPARATOR, ChannelEvent, ChannelKind, QueueEvent};

use crate::broker::{Broker, Delivery};
use registry::{ErasedHandler, Registry};

enum BusState {
    Idle,
    /// `channels` are the broker subscriptions still held by this bus.
    Ready {
        active: Arc<AtomicBool>,
        channels: Vec<String>,
    },
}

/// Queue-scoped façade over a shared broker connection.
pub struct QueueEventBus {
    broker: Arc<dyn Broker>,
    queue_id: Arc<str>,
    registry: Arc<Registry>,
    state: Mutex<BusState>,
}

impl QueueEventBus {
    /// Bind a bus to `queue_id`. Nothing is subscribed until [`initialize`](Self::initialize).
    pub fn new(broker: Arc<dyn Broker>, queue_id: impl Into<String>) -> Result<Self, BusError> {
        let queue_id = queue_id.into();
        if queue_id.is_empty() {
            return Err(BusError::InvalidQueueId(queue_id, "must not be empty"));
        }
        if queue_id.contains(CHANNEL_SEPARATOR) {
            return Err(BusError::InvalidQueueId(
                queue_id,
                "must not contain the channel separator ':'",
            ));
        }
        Ok(Self {
            broker,
            queue_id: Arc::from(queue_id),
            registry: Arc::new(Registry::default()),
            state: Mutex::new(BusState::Idle),
        })
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    /// Physical broker channel used for `kind`.
    pub fn channel_name(&self, kind: ChannelKind) -> String {
        format!("{}{}{}", self.queue_id, CHANNEL_SEPARATOR, kind)
    }

    /// Number of live local handler registrations.
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Subscribe the three queue channels and start their dispatchers.
    ///
    /// On failure every channel subscribed so far is unsubscribed again and the
    /// bus stays uninitialized.
    #[instrument(level = "debug", skip(self), fields(queue = %self.queue_id))]
    pub async fn initialize(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        if matches!(*state, BusState::Ready { .. }) {
            return Err(BusError::AlreadyInitialized(self.queue_id.to_string()));
        }

        let active = Arc::new(AtomicBool::new(true));
        let mut receivers = Vec::with_capacity(ChannelKind::ALL.len());
        let mut subscribed = Vec::<String>::with_capacity(ChannelKind::ALL.len());

        for kind in ChannelKind::ALL {
            let channel = self.channel_name(kind);
            let (tx, rx) = mpsc::unbounded_channel::<String>();
            let delivery: Delivery = Arc::new(move |payload: String| {
                // The dispatcher is gone once the bus is torn down.
                let _ = tx.send(payload);
            });

            if let Err(e) = self.broker.subscribe(&channel, delivery).await {
                warn!(channel = %channel, error = %e, "subscribe failed, rolling back");
                active.store(false, Ordering::Release);
                for done in &subscribed {
                    if let Err(e) = self.broker.unsubscribe(done).await {
                        warn!(channel = %done, error = %e, "rollback unsubscribe failed");
                    }
                }
                return Err(e.into());
            }
            subscribed.push(channel);
            receivers.push((kind, rx));
        }

        for (kind, rx) in receivers {
            tokio::spawn(dispatch::run(
                Arc::clone(&self.queue_id),
                kind,
                rx,
                Arc::clone(&self.registry),
                Arc::clone(&active),
            ));
        }

        *state = BusState::Ready {
            active,
            channels: subscribed,
        };
        debug!("event bus initialized");
        Ok(())
    }

    /// Unsubscribe every channel, stop dispatching and drop all local registrations.
    ///
    /// Idempotent. Every channel is attempted and the first broker failure is
    /// returned. Channels that failed to unsubscribe stay recorded, so the bus
    /// remains initialized until a later `teardown` releases them.
    #[instrument(level = "debug", skip(self), fields(queue = %self.queue_id))]
    pub async fn teardown(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        self.registry.clear();

        let BusState::Ready { active, channels } = &mut *state else {
            trace!("event bus already idle");
            return Ok(());
        };
        active.store(false, Ordering::Release);

        let mut first_err = None;
        let mut kept = Vec::new();
        for channel in channels.drain(..) {
            if let Err(e) = self.broker.unsubscribe(&channel).await {
                warn!(channel = %channel, error = %e, "unsubscribe failed");
                first_err.get_or_insert(e);
                kept.push(channel);
            }
        }

        match first_err {
            Some(e) => {
                *channels = kept;
                Err(e.into())
            }
            None => {
                *state = BusState::Idle;
                debug!("event bus torn down");
                Ok(())
            }
        }
    }

    /// Register a persistent handler for events of type `E`.
    pub fn on<E, F, Fut>(&self, handler: F) -> SubscriptionId
    where
        E: ChannelEvent,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.once_or_more::<E, _, _>(move |event| {
            let fut = handler(event);
            async move { fut.await.map(|()| Disposition::Stay) }
        })
    }

    /// Register a handler that decides after each event whether to stay registered.
    pub fn once_or_more<E, F, Fut>(&self, handler: F) -> SubscriptionId
    where
        E: ChannelEvent,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Disposition, HandlerError>> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |event: QueueEvent| match E::from_event(event) {
            Some(typed) => handler(typed).boxed(),
            None => async { Ok(Disposition::Stay) }.boxed(),
        });
        let kind = E::KIND;
        let id = self.registry.insert(kind, erased);
        trace!(queue = %self.queue_id, channel = %kind, subscription = %id, "handler registered");
        id
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.remove(id);
        trace!(queue = %self.queue_id, subscription = %id, removed, "handler unregistered");
        removed
    }

    /// Publish `event` on its namespaced channel. Broker failures are returned as is.
    pub async fn emit<E: ChannelEvent>(&self, event: E) -> Result<(), BusError> {
        let payload = event.into_event().to_payload()?;
        let channel = self.channel_name(E::KIND);
        self.broker.publish(&channel, &payload).await?;
        trace!(channel = %channel, "event emitted");
        Ok(())
    }
}

/// Dropping an initialized bus stops its dispatchers and releases the broker
/// subscriptions in the background. Call [`QueueEventBus::teardown`] to observe
/// unsubscribe failures.
impl Drop for QueueEventBus {
    fn drop(&mut self) {
        self.registry.clear();
        let BusState::Ready { active, channels } =
            std::mem::replace(self.state.get_mut(), BusState::Idle)
        else {
            return;
        };
        active.store(false, Ordering::Release);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(queue = %self.queue_id, "event bus dropped outside a runtime, broker subscriptions kept");
            return;
        };
        let broker = Arc::clone(&self.broker);
        let queue = Arc::clone(&self.queue_id);
        runtime.spawn(async move {
            for channel in channels {
                if let Err(e) = broker.unsubscribe(&channel).await {
                    warn!(queue = %queue, channel = %channel, error = %e, "unsubscribe on drop failed");
                }
            }
            trace!(queue = %queue, "dropped event bus released its channels");
        });
    }
}
