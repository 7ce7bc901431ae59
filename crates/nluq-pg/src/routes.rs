use std::collections::HashMap;

use nluq_core::{BrokerError, Delivery};

/// Channel name to callback table owned by the listener task.
#[derive(Default)]
pub(crate) struct Routes {
    channels: HashMap<String, Delivery>,
}

impl Routes {
    pub(crate) fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub(crate) fn insert(&mut self, channel: String, on_message: Delivery) -> Result<(), BrokerError> {
        if self.channels.contains_key(&channel) {
            return Err(BrokerError::Subscribe {
                channel,
                reason: "connection is already subscribed".into(),
            });
        }
        self.channels.insert(channel, on_message);
        Ok(())
    }

    pub(crate) fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel).is_some()
    }

    /// Hand `payload` to the callback of `channel`. Returns `false` if nobody listens.
    pub(crate) fn deliver(&self, channel: &str, payload: &str) -> bool {
        match self.channels.get(channel) {
            Some(deliver) => {
                deliver(payload.to_string());
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn routes_payloads_by_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut routes = Routes::default();
        routes
            .insert(
                "training:cancel_task".into(),
                Arc::new(move |p: String| sink.lock().unwrap().push(p)),
            )
            .unwrap();

        assert!(routes.deliver("training:cancel_task", "{}"));
        assert!(!routes.deliver("training:cancel_task_done", "{}"));
        assert_eq!(*seen.lock().unwrap(), vec!["{}".to_string()]);
    }

    #[test]
    fn duplicate_and_missing_channels() {
        let mut routes = Routes::default();
        routes.insert("c".into(), Arc::new(|_: String| {})).unwrap();
        assert!(matches!(
            routes.insert("c".into(), Arc::new(|_: String| {})),
            Err(BrokerError::Subscribe { .. })
        ));

        assert!(routes.remove("c"));
        assert!(!routes.remove("c"));
        assert!(!routes.contains("c"));
    }
}
