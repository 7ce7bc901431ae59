use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tracing::trace;

use super::{Broker, BrokerError, Delivery};

#[derive(Default)]
struct HubState {
    next_connection: u64,
    channels: HashMap<String, BTreeMap<u64, Delivery>>,
}

/// In-process broker server.
///
/// Each [`MemoryHub::connect`] returns an independent connection, standing in
/// for one process of the cluster. Delivery happens synchronously inside
/// `publish` while the hub lock is held, which gives every connection the same
/// per-channel order. Callbacks must therefore not call back into the hub.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this hub.
    pub fn connect(&self) -> MemoryBroker {
        let id = {
            let mut state = self.lock();
            state.next_connection += 1;
            state.next_connection
        };
        MemoryBroker {
            hub: self.clone(),
            connection: id,
        }
    }

    /// Number of connections subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().channels.get(channel).map_or(0, BTreeMap::len)
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One connection to a [`MemoryHub`]. Dropping it drops its subscriptions.
pub struct MemoryBroker {
    hub: MemoryHub,
    connection: u64,
}

impl MemoryBroker {
    /// The hub this connection belongs to.
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn subscribe(&self, channel: &str, on_message: Delivery) -> Result<(), BrokerError> {
        let mut state = self.hub.lock();
        let subs = state.channels.entry(channel.to_string()).or_default();
        if subs.contains_key(&self.connection) {
            return Err(BrokerError::Subscribe {
                channel: channel.to_string(),
                reason: "connection is already subscribed".into(),
            });
        }
        subs.insert(self.connection, on_message);
        trace!(channel, connection = self.connection, "memory broker subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut state = self.hub.lock();
        if let Some(subs) = state.channels.get_mut(channel) {
            subs.remove(&self.connection);
            if subs.is_empty() {
                state.channels.remove(channel);
            }
        }
        trace!(channel, connection = self.connection, "memory broker unsubscribed");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let state = self.hub.lock();
        let Some(subs) = state.channels.get(channel) else {
            trace!(channel, "memory broker publish without subscribers");
            return Ok(());
        };
        for deliver in subs.values() {
            deliver(payload.to_string());
        }
        trace!(channel, receivers = subs.len(), "memory broker published");
        Ok(())
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        let mut state = self.hub.lock();
        state.channels.retain(|_, subs| {
            subs.remove(&self.connection);
            !subs.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Delivery, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let delivery: Delivery = Arc::new(move |payload: String| sink.lock().unwrap().push(payload));
        (delivery, seen)
    }

    #[tokio::test]
    async fn publish_reaches_every_connection_in_order() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = hub.connect();

        let (da, seen_a) = recorder();
        let (db, seen_b) = recorder();
        a.subscribe("q:chan", da).await.unwrap();
        b.subscribe("q:chan", db).await.unwrap();

        for i in 0..5 {
            a.publish("q:chan", &i.to_string()).await.unwrap();
        }

        let expected: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        assert_eq!(*seen_a.lock().unwrap(), expected);
        assert_eq!(*seen_b.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn unsubscribe_only_affects_own_connection() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let b = hub.connect();

        let (da, seen_a) = recorder();
        let (db, seen_b) = recorder();
        a.subscribe("chan", da).await.unwrap();
        b.subscribe("chan", db).await.unwrap();

        a.unsubscribe("chan").await.unwrap();
        b.publish("chan", "x").await.unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(*seen_b.lock().unwrap(), vec!["x".to_string()]);
        assert_eq!(hub.subscriber_count("chan"), 1);
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_rejected() {
        let hub = MemoryHub::new();
        let a = hub.connect();

        let (d1, _) = recorder();
        let (d2, _) = recorder();
        a.subscribe("chan", d1).await.unwrap();

        let err = a.subscribe("chan", d2).await.unwrap_err();
        assert!(matches!(err, BrokerError::Subscribe { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        a.publish("nobody", "payload").await.unwrap();
    }

    #[tokio::test]
    async fn dropping_connection_releases_subscriptions() {
        let hub = MemoryHub::new();
        let a = hub.connect();
        let (d, _) = recorder();
        a.subscribe("chan", d).await.unwrap();
        assert_eq!(hub.subscriber_count("chan"), 1);

        drop(a);
        assert_eq!(hub.subscriber_count("chan"), 0);
    }
}
