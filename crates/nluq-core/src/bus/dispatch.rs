use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use nluq_model::{ChannelKind, QueueEvent};

use super::{Disposition, registry::Registry};

/// Per-channel delivery loop.
///
/// Payloads of one channel are decoded and handed to the handlers one event
/// at a time, each handler awaited before the next, so per-channel order
/// holds end to end. The loop ends when the broker drops its sender.
pub(crate) async fn run(
    queue_id: Arc<str>,
    kind: ChannelKind,
    mut rx: mpsc::UnboundedReceiver<String>,
    registry: Arc<Registry>,
    active: Arc<AtomicBool>,
) {
    while let Some(payload) = rx.recv().await {
        if !active.load(Ordering::Acquire) {
            trace!(queue = %queue_id, channel = %kind, "bus inactive, dropping payload");
            continue;
        }

        let event = match QueueEvent::from_payload(kind, &payload) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(queue = %queue_id, channel = %kind, error = %e, "dropping undecodable payload");
                continue;
            }
        };

        for (id, handler) in registry.snapshot(kind) {
            // Removed by an earlier handler of the same event.
            if !registry.contains(id) {
                continue;
            }

            let event = event.clone();
            let res = AssertUnwindSafe(async move { handler(event).await })
                .catch_unwind()
                .await;
            match res {
                Ok(Ok(Disposition::Stay)) => {}
                Ok(Ok(Disposition::Leave)) => {
                    registry.remove(id);
                    debug!(queue = %queue_id, channel = %kind, subscription = %id, "handler left");
                }
                Ok(Err(e)) => {
                    warn!(queue = %queue_id, channel = %kind, subscription = %id, error = %e, "handler failed");
                }
                Err(panic) => {
                    let msg = if let Some(msg) = panic.downcast_ref::<&'static str>() {
                        (*msg).to_string()
                    } else if let Some(msg) = panic.downcast_ref::<String>() {
                        msg.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    error!(queue = %queue_id, channel = %kind, subscription = %id, reason = %msg, "handler panicked");
                }
            }
        }
    }
    trace!(queue = %queue_id, channel = %kind, "dispatcher stopped");
}
