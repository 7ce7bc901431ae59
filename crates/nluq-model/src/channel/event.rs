use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    ClusterId,
    channel::ChannelKind,
    error::{ModelError, ModelResult},
};

/// Payload of `cancel_task`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTask {
    /// Canonical key of the task to cancel.
    pub task_id: String,
    /// Node believed to own the task.
    pub cluster_id: ClusterId,
}

/// Error reported by the owner of a task when cancellation failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Payload of `cancel_task_done`. No `error` means the task was cancelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTaskDone {
    pub task_id: String,
    #[serde(default, alias = "err", skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl CancelTaskDone {
    pub fn ok(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            error: None,
        }
    }

    pub fn failed(task_id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            task_id: task_id.into(),
            error: Some(error),
        }
    }
}

/// `run_scheduler_interrupt` carries no payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSchedulerInterrupt;

/// One event delivered on a queue channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    CancelTask(CancelTask),
    CancelTaskDone(CancelTaskDone),
    RunSchedulerInterrupt,
}

impl QueueEvent {
    /// Channel this event travels on.
    pub fn kind(&self) -> ChannelKind {
        match self {
            QueueEvent::CancelTask(_) => ChannelKind::CancelTask,
            QueueEvent::CancelTaskDone(_) => ChannelKind::CancelTaskDone,
            QueueEvent::RunSchedulerInterrupt => ChannelKind::RunSchedulerInterrupt,
        }
    }

    /// Encode the broker payload (JSON; empty for the interrupt).
    pub fn to_payload(&self) -> ModelResult<String> {
        match self {
            QueueEvent::CancelTask(p) => to_json(ChannelKind::CancelTask, p),
            QueueEvent::CancelTaskDone(p) => to_json(ChannelKind::CancelTaskDone, p),
            QueueEvent::RunSchedulerInterrupt => Ok(String::new()),
        }
    }

    /// Decode a broker payload received on a channel of the given kind.
    pub fn from_payload(kind: ChannelKind, payload: &str) -> ModelResult<Self> {
        match kind {
            ChannelKind::CancelTask => from_json(kind, payload).map(QueueEvent::CancelTask),
            ChannelKind::CancelTaskDone => from_json(kind, payload).map(QueueEvent::CancelTaskDone),
            ChannelKind::RunSchedulerInterrupt => Ok(QueueEvent::RunSchedulerInterrupt),
        }
    }
}

fn to_json<T: Serialize>(kind: ChannelKind, payload: &T) -> ModelResult<String> {
    serde_json::to_string(payload).map_err(|e| ModelError::Payload {
        channel: kind.as_str(),
        reason: e.to_string(),
    })
}

fn from_json<T: DeserializeOwned>(kind: ChannelKind, payload: &str) -> ModelResult<T> {
    serde_json::from_str(payload).map_err(|e| ModelError::Payload {
        channel: kind.as_str(),
        reason: e.to_string(),
    })
}

/// A payload type bound to exactly one channel kind.
///
/// Lets callers register handlers by payload type while the bus dispatches on [`QueueEvent`].
pub trait ChannelEvent: Sized + Send + 'static {
    const KIND: ChannelKind;

    /// Extract the payload if the event belongs to this channel.
    fn from_event(event: QueueEvent) -> Option<Self>;

    fn into_event(self) -> QueueEvent;
}

impl ChannelEvent for CancelTask {
    const KIND: ChannelKind = ChannelKind::CancelTask;

    fn from_event(event: QueueEvent) -> Option<Self> {
        match event {
            QueueEvent::CancelTask(p) => Some(p),
            _ => None,
        }
    }

    fn into_event(self) -> QueueEvent {
        QueueEvent::CancelTask(self)
    }
}

impl ChannelEvent for CancelTaskDone {
    const KIND: ChannelKind = ChannelKind::CancelTaskDone;

    fn from_event(event: QueueEvent) -> Option<Self> {
        match event {
            QueueEvent::CancelTaskDone(p) => Some(p),
            _ => None,
        }
    }

    fn into_event(self) -> QueueEvent {
        QueueEvent::CancelTaskDone(self)
    }
}

impl ChannelEvent for RunSchedulerInterrupt {
    const KIND: ChannelKind = ChannelKind::RunSchedulerInterrupt;

    fn from_event(event: QueueEvent) -> Option<Self> {
        match event {
            QueueEvent::RunSchedulerInterrupt => Some(RunSchedulerInterrupt),
            _ => None,
        }
    }

    fn into_event(self) -> QueueEvent {
        QueueEvent::RunSchedulerInterrupt
    }
}
