//! Cluster-wide transaction lock on a PostgreSQL advisory lock.
//!
//! ```text
//! run_in_lock(name, trx) ──► TaskSerializer ──► pg_advisory_lock(k1, k2) ──► trx() ──► pg_advisory_unlock(k1, k2)
//!                            (one per process)   (one per cluster)                       (always, once locked)
//! ```
//!
//! Advisory locks belong to a session, so the locker owns one dedicated
//! connection and funnels every transaction through its own serializer: the
//! serializer orders callers inside this process, the advisory lock orders the
//! processes.
use std::{
    convert::Infallible,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::FutureExt;
use sha2::{Digest, Sha256};
use sqlx::{Connection, PgConnection};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use nluq_core::{TaskError, TaskSerializer};

/// Name hashed into the advisory lock key when none is given.
pub const DEFAULT_LOCK_NAME: &str = "trx_lock";

/// Why a transaction did not produce its value.
#[derive(Debug, Error)]
pub enum LockError<E> {
    #[error("locker session error: {0}")]
    Connection(String),

    #[error("acquiring advisory lock failed: {0}")]
    Lock(String),

    #[error("releasing advisory lock failed: {0}")]
    Unlock(String),

    /// The transaction returned its own error; the lock was released.
    #[error("transaction failed: {0}")]
    Failed(E),

    /// The transaction panicked; the lock was released.
    #[error("transaction panicked: {0}")]
    Panicked(String),

    #[error("transaction locker is closed")]
    Closed,
}

impl<E> From<TaskError<LockError<E>>> for LockError<E> {
    fn from(err: TaskError<LockError<E>>) -> Self {
        match err {
            TaskError::Failed(inner) => inner,
            TaskError::Panicked(msg) => LockError::Panicked(msg),
            TaskError::Closed => LockError::Closed,
        }
    }
}

/// Two `int4` advisory lock keys: the first eight bytes of `sha256(name)`,
/// read as little-endian signed integers.
pub fn lock_key(name: &str) -> (i32, i32) {
    let digest = Sha256::digest(name.as_bytes());
    let word = |at: usize| i32::from_le_bytes([digest[at], digest[at + 1], digest[at + 2], digest[at + 3]]);
    (word(0), word(4))
}

/// Runs transactions one at a time across every process sharing the database.
pub struct PgTransactionLocker {
    conn: Arc<Mutex<Option<PgConnection>>>,
    serializer: TaskSerializer,
    key: (i32, i32),
}

impl PgTransactionLocker {
    /// Open the locker's session on [`DEFAULT_LOCK_NAME`].
    pub async fn connect(url: &str) -> Result<Self, LockError<Infallible>> {
        Self::connect_named(url, DEFAULT_LOCK_NAME).await
    }

    /// Open the locker's session; lockers with the same `lock_name` exclude each other.
    #[instrument(level = "debug", skip(url))]
    pub async fn connect_named(
        url: &str,
        lock_name: &str,
    ) -> Result<Self, LockError<Infallible>> {
        let conn = PgConnection::connect(url)
            .await
            .map_err(|e| LockError::Connection(e.to_string()))?;
        info!("transaction locker connected");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            serializer: TaskSerializer::new(),
            key: lock_key(lock_name),
        })
    }

    pub fn key(&self) -> (i32, i32) {
        self.key
    }

    /// Transactions submitted and not finished yet in this process.
    pub fn pending(&self) -> usize {
        self.serializer.pending()
    }

    /// Run `trx` once this process's turn has come and the advisory lock is held.
    ///
    /// The lock is released after `trx` returns, fails or panics.
    pub async fn run_in_lock<F, Fut, T, E>(
        &self,
        name: impl Into<String>,
        trx: F,
    ) -> Result<T, LockError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let (k1, k2) = self.key;
        let name = name.into();
        let trx_name = name.clone();

        self.serializer
            .submit_named(name, move || async move {
                let mut guard = conn.lock().await;
                let Some(session) = guard.as_mut() else {
                    return Err(LockError::Closed);
                };

                sqlx::query("SELECT pg_advisory_lock($1, $2)")
                    .bind(k1)
                    .bind(k2)
                    .execute(&mut *session)
                    .await
                    .map_err(|e| LockError::Lock(e.to_string()))?;
                debug!(trx = %trx_name, "advisory lock held");

                let outcome = AssertUnwindSafe(async move { trx().await })
                    .catch_unwind()
                    .await;

                let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1, $2)")
                    .bind(k1)
                    .bind(k2)
                    .fetch_one(&mut *session)
                    .await;
                match &unlocked {
                    Ok(true) => debug!(trx = %trx_name, "advisory lock released"),
                    Ok(false) => warn!(trx = %trx_name, "advisory lock was not held at release"),
                    Err(e) => warn!(trx = %trx_name, error = %e, "advisory unlock failed"),
                }

                match outcome {
                    Ok(Ok(value)) => {
                        unlocked.map_err(|e| LockError::Unlock(e.to_string()))?;
                        Ok(value)
                    }
                    Ok(Err(e)) => Err(LockError::Failed(e)),
                    Err(payload) => panic::resume_unwind(payload),
                }
            })
            .await
            .map_err(LockError::from)
    }

    /// Close the session after every queued transaction has finished.
    ///
    /// Later calls to [`run_in_lock`](Self::run_in_lock) fail with [`LockError::Closed`].
    pub async fn close(&self) -> Result<(), LockError<Infallible>> {
        let conn = Arc::clone(&self.conn);
        self.serializer
            .submit_named("close", move || async move {
                let Some(session) = conn.lock().await.take() else {
                    return Ok(());
                };
                session
                    .close()
                    .await
                    .map_err(|e| LockError::Connection(e.to_string()))?;
                debug!("transaction locker closed");
                Ok::<_, LockError<Infallible>>(())
            })
            .await
            .map_err(LockError::from)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn lock_key_reads_the_digest_little_endian() {
        assert_eq!(lock_key(DEFAULT_LOCK_NAME), (1147309989, 1253539067));
        assert_eq!(lock_key("training"), (-1938228286, -354685315));
    }

    #[test]
    fn serializer_outcomes_flatten_into_lock_errors() {
        let inner: TaskError<LockError<&str>> = TaskError::Failed(LockError::Failed("busy"));
        assert!(matches!(LockError::from(inner), LockError::Failed("busy")));

        let lost: TaskError<LockError<&str>> = TaskError::Failed(LockError::Lock("reset".into()));
        assert!(matches!(LockError::from(lost), LockError::Lock(r) if r == "reset"));

        let panicked: TaskError<LockError<&str>> = TaskError::Panicked("boom".into());
        assert!(matches!(LockError::from(panicked), LockError::Panicked(m) if m == "boom"));

        let closed: TaskError<LockError<&str>> = TaskError::Closed;
        assert!(matches!(LockError::from(closed), LockError::Closed));
    }

    /// Needs a reachable database in `NLUQ_PG_URL`.
    #[tokio::test]
    #[ignore]
    async fn lock_is_released_after_failure_and_panic() {
        let url = std::env::var("NLUQ_PG_URL").unwrap();
        let a = PgTransactionLocker::connect_named(&url, "nluq-locker-test").await.unwrap();
        let b = PgTransactionLocker::connect_named(&url, "nluq-locker-test").await.unwrap();

        let failed = a
            .run_in_lock("fails", || async { Err::<(), _>("rejected") })
            .await;
        assert!(matches!(failed, Err(LockError::Failed("rejected"))));

        let panicked = a
            .run_in_lock("panics", || async {
                if true {
                    panic!("trx blew up");
                }
                Ok::<(), String>(())
            })
            .await;
        assert!(matches!(panicked, Err(LockError::Panicked(m)) if m == "trx blew up"));

        // A second session only gets the lock if the first released it.
        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        b.run_in_lock("other session", move || async move {
            r.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await
        .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        a.close().await.unwrap();
        assert!(matches!(
            a.run_in_lock("after close", || async { Ok::<(), String>(()) }).await,
            Err(LockError::Closed)
        ));
        b.close().await.unwrap();
    }
}
