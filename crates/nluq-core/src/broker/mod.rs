//! Publish/subscribe transport shared by every queue of a process.
//!
//! The bus depends only on the [`Broker`] capability, so a database channel
//! mechanism, a message broker or the in-memory [`MemoryHub`] can back it.
//!
//! Expected guarantees of an implementation:
//! - at-least-once delivery to every connection subscribed to a channel;
//! - per-channel ordering: a connection sees a channel's messages in publish order;
//! - `publish` does not require a subscriber;
//! - callbacks are invoked from the broker's own context and must not block.
mod memory;
pub use memory::{MemoryBroker, MemoryHub};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Callback receiving the raw payload of each message on a subscribed channel.
pub type Delivery = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("subscribe to '{channel}' failed: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("unsubscribe from '{channel}' failed: {reason}")]
    Unsubscribe { channel: String, reason: String },

    #[error("publish to '{channel}' failed: {reason}")]
    Publish { channel: String, reason: String },

    #[error("broker connection error: {0}")]
    Connection(String),
}

/// Minimal named-channel pub/sub capability.
///
/// One value represents one connection: `unsubscribe` removes this connection's
/// subscription only.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Start delivering messages published on `channel` to `on_message`.
    async fn subscribe(&self, channel: &str, on_message: Delivery) -> Result<(), BrokerError>;

    /// Stop delivering messages from `channel` and drop its callback.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError>;

    /// Publish `payload` to every connection subscribed to `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;
}
