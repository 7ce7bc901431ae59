use std::time::Duration;

use thiserror::Error;

use nluq_model::ModelError;

use crate::{bus::BusError, serializer::TaskError};

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("no reply to cancel of '{task_id}' within {after:?}")]
    Timeout { task_id: String, after: Duration },

    #[error("remote cancel failed: {message}")]
    Remote {
        message: String,
        stack: Option<String>,
    },

    #[error("task '{0}' is not running on this node")]
    NotRunning(String),

    #[error("cancel of '{0}' aborted: waiter dropped before a reply arrived")]
    Aborted(String),

    #[error("invalid task id: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("task serializer: {0}")]
    Serializer(String),

    #[error("local cancel failed: {0}")]
    Local(String),
}

impl From<TaskError<CancelError>> for CancelError {
    fn from(err: TaskError<CancelError>) -> Self {
        match err {
            TaskError::Failed(e) => e,
            TaskError::Panicked(msg) => CancelError::Serializer(format!("cancel panicked: {msg}")),
            TaskError::Closed => CancelError::Serializer("closed".into()),
        }
    }
}
