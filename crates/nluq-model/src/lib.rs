mod constants;
pub use constants::{CHANNEL_SEPARATOR, JOB_KEY_SEPARATOR, MODEL_ID_SEPARATOR};

mod error;
pub use error::{ModelError, ModelResult};

mod identity;
pub use identity::{JobId, ModelId};

mod channel;
pub use channel::{
    CancelTask, CancelTaskDone, ChannelEvent, ChannelKind, QueueEvent, RemoteError,
    RunSchedulerInterrupt,
};

mod artifact;
pub use artifact::ModelArtifact;

/// Identifier of one node (process) in the cluster.
pub type ClusterId = String;

/// Identifier of one logical queue sharing a broker connection.
pub type QueueId = String;
