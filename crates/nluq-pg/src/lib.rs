//! PostgreSQL transport for the queue event bus (`LISTEN/NOTIFY`) and a
//! cluster-wide transaction lock (advisory locks).
mod broker;
mod config;
mod locker;
mod routes;

pub use broker::{MAX_CHANNEL_LEN, PgBroker};
pub use config::PgBrokerConfig;
pub use locker::{DEFAULT_LOCK_NAME, LockError, PgTransactionLocker, lock_key};
