use std::time::Duration;

use serde::{Deserialize, Serialize};

use nluq_model::CHANNEL_SEPARATOR;

use crate::error::CoreError;

/// Queue coordination settings for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Namespace of the queue channels on the broker.
    pub queue_id: String,
    /// Identifier of this node in the cluster.
    pub cluster_id: String,
    /// How long a cancel request waits for the owner's reply.
    pub cancel_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_id: "training".to_string(),
            cluster_id: "local".to_string(),
            cancel_timeout_ms: 2000,
        }
    }
}

impl QueueConfig {
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.queue_id.is_empty() {
            return Err(CoreError::Config("queue_id must not be empty".into()));
        }
        if self.queue_id.contains(CHANNEL_SEPARATOR) {
            return Err(CoreError::Config(format!(
                "queue_id '{}' must not contain '{CHANNEL_SEPARATOR}'",
                self.queue_id
            )));
        }
        if self.cluster_id.is_empty() {
            return Err(CoreError::Config("cluster_id must not be empty".into()));
        }
        if self.cancel_timeout_ms == 0 {
            return Err(CoreError::Config("cancel_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.queue_id, "training");
        assert_eq!(cfg.cluster_id, "local");
        assert_eq!(cfg.cancel_timeout(), Duration::from_secs(2));
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: QueueConfig = serde_json::from_str(r#"{"cluster_id":"node-7"}"#).unwrap();
        assert_eq!(cfg.cluster_id, "node-7");
        assert_eq!(cfg.queue_id, "training");
        assert_eq!(cfg.cancel_timeout_ms, 2000);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad = [
            QueueConfig {
                queue_id: String::new(),
                ..Default::default()
            },
            QueueConfig {
                queue_id: "a:b".into(),
                ..Default::default()
            },
            QueueConfig {
                cluster_id: String::new(),
                ..Default::default()
            },
            QueueConfig {
                cancel_timeout_ms: 0,
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(CoreError::Config(_))), "{cfg:?}");
        }
    }
}
