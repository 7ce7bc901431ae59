pub mod broker;
pub mod bus;
pub mod cancel;
pub mod config;
pub mod error;
pub mod serializer;

pub use broker::{Broker, BrokerError, Delivery, MemoryBroker, MemoryHub};
pub use bus::{BusError, Disposition, HandlerError, QueueEventBus, SubscriptionId};
pub use cancel::{CancelCoordinator, CancelError, LocalCanceller, LocalTasks};
pub use config::QueueConfig;
pub use error::CoreError;
pub use serializer::{TaskError, TaskSerializer};

pub mod prelude {
    pub use crate::broker::{Broker, BrokerError};
    pub use crate::bus::{Disposition, HandlerError, QueueEventBus, SubscriptionId};
    pub use crate::cancel::{CancelCoordinator, CancelError, LocalCanceller};
    pub use crate::error::CoreError;
    pub use crate::serializer::{TaskError, TaskSerializer};
}
