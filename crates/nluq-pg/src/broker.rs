use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use nluq_core::{Broker, BrokerError, Delivery};

use crate::{config::PgBrokerConfig, routes::Routes};

const RECV_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Longest channel name PostgreSQL keeps intact; longer identifiers are truncated.
pub const MAX_CHANNEL_LEN: usize = 63;

fn check_channel(channel: &str) -> Result<(), String> {
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(format!(
            "channel name is {} bytes, postgres allows at most {MAX_CHANNEL_LEN}",
            channel.len()
        ));
    }
    Ok(())
}

enum Command {
    Listen {
        channel: String,
        on_message: Delivery,
        ack: oneshot::Sender<Result<(), BrokerError>>,
    },
    Unlisten {
        channel: String,
        ack: oneshot::Sender<Result<(), BrokerError>>,
    },
}

/// [`Broker`] backed by PostgreSQL notifications.
///
/// A background task owns the `PgListener` connection: it applies
/// `LISTEN`/`UNLISTEN` commands and forwards notifications to callbacks in
/// arrival order. Publishing goes through the pool with `pg_notify`. The
/// listener re-establishes a dropped connection and re-listens on its own.
pub struct PgBroker {
    pool: PgPool,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl PgBroker {
    /// Open a pool and a listener connection for `cfg`.
    #[instrument(level = "debug", skip(cfg), fields(max_connections = cfg.max_connections))]
    pub async fn connect(cfg: &PgBrokerConfig) -> Result<Self, BrokerError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.url)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Self::with_pool(pool).await
    }

    /// Reuse an existing pool; one extra connection is taken for listening.
    pub async fn with_pool(pool: PgPool) -> Result<Self, BrokerError> {
        let listener = PgListener::connect_with(&pool)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let (commands, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tokio::spawn(listen_loop(listener, rx, shutdown.clone()));
        info!("postgres broker connected");

        Ok(Self {
            pool,
            commands,
            shutdown,
        })
    }

    async fn send(
        &self,
        channel: &str,
        make: impl FnOnce(oneshot::Sender<Result<(), BrokerError>>) -> Command,
    ) -> Result<(), BrokerError> {
        let (ack, done) = oneshot::channel();
        let gone = || BrokerError::Connection(format!("listener task stopped while handling '{channel}'"));
        self.commands.send(make(ack)).map_err(|_| gone())?;
        done.await.map_err(|_| gone())?
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn subscribe(&self, channel: &str, on_message: Delivery) -> Result<(), BrokerError> {
        check_channel(channel).map_err(|reason| BrokerError::Subscribe {
            channel: channel.to_string(),
            reason,
        })?;
        let name = channel.to_string();
        self.send(channel, move |ack| Command::Listen {
            channel: name,
            on_message,
            ack,
        })
        .await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let name = channel.to_string();
        self.send(channel, move |ack| Command::Unlisten { channel: name, ack })
            .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        check_channel(channel).map_err(|reason| BrokerError::Publish {
            channel: channel.to_string(),
            reason,
        })?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        trace!(channel, "notification published");
        Ok(())
    }
}

impl Drop for PgBroker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn listen_loop(
    mut listener: PgListener,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
) {
    let mut routes = Routes::default();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            cmd = commands.recv() => match cmd {
                Some(cmd) => apply(&mut listener, &mut routes, cmd).await,
                None => break,
            },
            msg = listener.recv() => match msg {
                Ok(n) => {
                    if !routes.deliver(n.channel(), n.payload()) {
                        trace!(channel = n.channel(), "notification without route");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "listener receive failed, retrying");
                    tokio::time::sleep(RECV_RETRY_DELAY).await;
                }
            },
        }
    }
    debug!("postgres listener stopped");
}

async fn apply(listener: &mut PgListener, routes: &mut Routes, cmd: Command) {
    match cmd {
        Command::Listen {
            channel,
            on_message,
            ack,
        } => {
            let res = if routes.contains(&channel) {
                routes.insert(channel, on_message)
            } else {
                match listener.listen(&channel).await {
                    Ok(()) => {
                        debug!(channel = %channel, "listening");
                        routes.insert(channel, on_message)
                    }
                    Err(e) => Err(BrokerError::Subscribe {
                        channel,
                        reason: e.to_string(),
                    }),
                }
            };
            let _ = ack.send(res);
        }
        Command::Unlisten { channel, ack } => {
            let res = if !routes.remove(&channel) {
                Ok(())
            } else {
                match listener.unlisten(&channel).await {
                    Ok(()) => {
                        debug!(channel = %channel, "stopped listening");
                        Ok(())
                    }
                    Err(e) => Err(BrokerError::Unsubscribe {
                        channel,
                        reason: e.to_string(),
                    }),
                }
            };
            let _ = ack.send(res);
        }
    }
}
