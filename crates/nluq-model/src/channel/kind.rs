use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// The fixed set of channels every queue owns on the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// A node asks the owner of a task to cancel it.
    CancelTask,
    /// The owner reports the outcome of a cancellation.
    CancelTaskDone,
    /// Wake every scheduler loop before its next poll tick.
    RunSchedulerInterrupt,
}

impl ChannelKind {
    /// All channel kinds, in subscription order.
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::CancelTask,
        ChannelKind::RunSchedulerInterrupt,
        ChannelKind::CancelTaskDone,
    ];

    /// Wire name of the channel kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::CancelTask => "cancel_task",
            ChannelKind::CancelTaskDone => "cancel_task_done",
            ChannelKind::RunSchedulerInterrupt => "run_scheduler_interrupt",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ModelError;
    fn from_str(s: &str) -> ModelResult<Self> {
        match s {
            "cancel_task" => Ok(ChannelKind::CancelTask),
            "cancel_task_done" => Ok(ChannelKind::CancelTaskDone),
            "run_scheduler_interrupt" => Ok(ChannelKind::RunSchedulerInterrupt),
            other => Err(ModelError::Invalid(format!("unknown channel kind: {other}"))),
        }
    }
}
