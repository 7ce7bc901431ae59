use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::BoxFuture;

use nluq_model::{ChannelKind, QueueEvent};

use super::HandlerError;

/// What a handler wants after processing an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the handler registered.
    Stay,
    /// Remove the handler; it receives no further events.
    Leave,
}

/// Opaque handle of one handler registration, used with [`QueueEventBus::off`](super::QueueEventBus::off).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub(crate) type ErasedHandler =
    Arc<dyn Fn(QueueEvent) -> BoxFuture<'static, Result<Disposition, HandlerError>> + Send + Sync>;

#[derive(Default)]
struct State {
    next: u64,
    entries: BTreeMap<SubscriptionId, (ChannelKind, ErasedHandler)>,
}

/// Handler registrations of one bus, shared with its dispatchers.
///
/// Ids grow monotonically, so iterating the map yields registration order.
#[derive(Default)]
pub(crate) struct Registry {
    state: Mutex<State>,
}

impl Registry {
    pub(crate) fn insert(&self, kind: ChannelKind, handler: ErasedHandler) -> SubscriptionId {
        let mut state = self.lock();
        state.next += 1;
        let id = SubscriptionId(state.next);
        state.entries.insert(id, (kind, handler));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    pub(crate) fn contains(&self, id: SubscriptionId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    /// Handlers currently registered for `kind`, in registration order.
    pub(crate) fn snapshot(&self, kind: ChannelKind) -> Vec<(SubscriptionId, ErasedHandler)> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, (k, _))| *k == kind)
            .map(|(id, (_, h))| (*id, Arc::clone(h)))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.lock().entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    fn noop() -> ErasedHandler {
        Arc::new(|_: QueueEvent| async { Ok(Disposition::Stay) }.boxed())
    }

    #[test]
    fn snapshot_filters_by_kind_in_registration_order() {
        let r = Registry::default();
        let a = r.insert(ChannelKind::CancelTask, noop());
        let _ = r.insert(ChannelKind::CancelTaskDone, noop());
        let c = r.insert(ChannelKind::CancelTask, noop());

        let ids: Vec<_> = r
            .snapshot(ChannelKind::CancelTask)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn remove_is_reported_once() {
        let r = Registry::default();
        let id = r.insert(ChannelKind::RunSchedulerInterrupt, noop());
        assert!(r.contains(id));
        assert!(r.remove(id));
        assert!(!r.remove(id));
        assert_eq!(r.len(), 0);
    }
}
