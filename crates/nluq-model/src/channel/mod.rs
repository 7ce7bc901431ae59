//! Queue channels and their wire payloads.
mod kind;
pub use kind::ChannelKind;

mod event;
pub use event::{
    CancelTask, CancelTaskDone, ChannelEvent, QueueEvent, RemoteError, RunSchedulerInterrupt,
};
