use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("malformed identity key '{key}': {reason}")]
    IdentityParse { key: String, reason: String },

    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("invalid payload for channel '{channel}': {reason}")]
    Payload {
        channel: &'static str,
        reason: String,
    },

    #[error("model artifact error: {0}")]
    Artifact(String),
}

impl ModelError {
    pub(crate) fn parse(key: &str, reason: impl Into<String>) -> Self {
        ModelError::IdentityParse {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
