use std::fmt;

use thiserror::Error;

use nluq_model::ModelError;

use crate::broker::BrokerError;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus for queue '{0}' is already initialized")]
    AlreadyInitialized(String),

    #[error("invalid queue id '{0}': {1}")]
    InvalidQueueId(String, &'static str),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("event encoding failed: {0}")]
    Encode(#[from] ModelError),
}

/// Failure reported by a bus handler. Logged by the dispatcher, never propagated.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string())
    }
}
