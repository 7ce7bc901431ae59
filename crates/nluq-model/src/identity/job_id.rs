use std::{fmt, hash::Hash, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    JOB_KEY_SEPARATOR,
    error::{ModelError, ModelResult},
    identity::ModelId,
};

/// Composite key of a queued job: the tenant that owns it and the model it trains.
///
/// Canonical key: `{tenant_id}/{model_id}`. Used as a storage key and as the
/// `taskId` carried on queue channels.
///
/// The tenant id is checked at construction (non-empty, no `/`), so
/// [`JobId::encode`] never fails and [`JobId::decode`] always inverts it.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId {
    tenant_id: String,
    model_id: ModelId,
}

impl JobId {
    /// Build a job id, rejecting tenant ids that would make the key ambiguous.
    pub fn new(tenant_id: impl Into<String>, model_id: ModelId) -> ModelResult<Self> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(ModelError::Invalid("tenant id is empty".into()));
        }
        if tenant_id.contains(JOB_KEY_SEPARATOR) {
            return Err(ModelError::Invalid(format!(
                "tenant id '{tenant_id}' contains reserved separator '{JOB_KEY_SEPARATOR}'"
            )));
        }
        Ok(Self {
            tenant_id,
            model_id,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Canonical key of this job.
    pub fn encode(&self) -> String {
        format!("{}{JOB_KEY_SEPARATOR}{}", self.tenant_id, self.model_id)
    }

    /// Parse a canonical key.
    ///
    /// Exactly one separator is accepted: keys with trailing fragments are rejected, not truncated.
    pub fn decode(key: &str) -> ModelResult<Self> {
        let mut parts = key.split(JOB_KEY_SEPARATOR);
        let (Some(tenant_id), Some(model_id), None) = (parts.next(), parts.next(), parts.next())
        else {
            let found = key.matches(JOB_KEY_SEPARATOR).count();
            return Err(ModelError::parse(
                key,
                format!("expected exactly one '{JOB_KEY_SEPARATOR}', found {found}"),
            ));
        };

        if tenant_id.is_empty() {
            return Err(ModelError::parse(key, "tenant id is empty"));
        }

        let model_id = model_id.parse::<ModelId>().map_err(|e| match e {
            ModelError::IdentityParse { reason, .. } => {
                ModelError::parse(key, format!("model id: {reason}"))
            }
            other => other,
        })?;

        Self::new(tenant_id, model_id)
    }
}

impl PartialEq for JobId {
    fn eq(&self, other: &Self) -> bool {
        self.tenant_id == other.tenant_id && self.model_id == other.model_id
    }
}

impl Hash for JobId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.tenant_id.hash(state);
        self.model_id.hash(state);
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{JOB_KEY_SEPARATOR}{}", self.tenant_id, self.model_id)
    }
}

impl FromStr for JobId {
    type Err = ModelError;
    fn from_str(s: &str) -> ModelResult<Self> {
        Self::decode(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = ModelError;
    fn try_from(s: String) -> ModelResult<Self> {
        Self::decode(&s)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(seed: i32) -> ModelId {
        ModelId::new("a0b1c2d3e4f5a6b7", "c8d9eafbacbdcedf", seed, "en").unwrap()
    }

    #[test]
    fn encode_decode_roundtrip() {
        for tenant in ["app", "tenant-42", "bot_01", "ünïcode"] {
            let id = JobId::new(tenant, model(42)).unwrap();
            let key = id.encode();

            let back = JobId::decode(&key).unwrap();
            assert_eq!(back, id);
            assert_eq!(back.tenant_id(), tenant);
            assert_eq!(back.encode(), key);
        }
    }

    #[test]
    fn encode_uses_slash_separator() {
        let id = JobId::new("app", model(1)).unwrap();
        assert_eq!(id.encode(), "app/a0b1c2d3e4f5a6b7.c8d9eafbacbdcedf.1.en");
        assert_eq!(id.to_string(), id.encode());
    }

    #[test]
    fn new_rejects_reserved_separator() {
        assert!(matches!(
            JobId::new("app/other", model(1)),
            Err(ModelError::Invalid(_))
        ));
        assert!(matches!(JobId::new("", model(1)), Err(ModelError::Invalid(_))));
    }

    #[test]
    fn decode_rejects_extra_fragments() {
        let key = "app/a0b1c2d3e4f5a6b7.c8d9eafbacbdcedf.1.en/trailing";
        match JobId::decode(key) {
            Err(ModelError::IdentityParse { key: k, reason }) => {
                assert_eq!(k, key);
                assert!(reason.contains("found 2"), "unexpected reason: {reason}");
            }
            other => panic!("expected IdentityParse, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_malformed_keys() {
        let bad = [
            "",
            "app",
            "/a0b1c2d3e4f5a6b7.c8d9eafbacbdcedf.1.en",
            "app/",
            "app/not-a-model",
        ];
        for key in bad {
            assert!(
                matches!(JobId::decode(key), Err(ModelError::IdentityParse { .. })),
                "expected parse error for {key:?}"
            );
        }
    }

    #[test]
    fn equality_uses_model_id_semantics() {
        let lower = JobId::new("app", model(7)).unwrap();
        let upper_model = ModelId::new("A0B1C2D3E4F5A6B7", "C8D9EAFBACBDCEDF", 7, "en").unwrap();
        let upper = JobId::new("app", upper_model).unwrap();

        assert_ne!(lower.encode(), upper.encode());
        assert_eq!(lower, upper);
        assert_eq!(lower, lower.clone());
    }

    #[test]
    fn equality_distinguishes_tenant_and_model() {
        let a = JobId::new("app", model(1)).unwrap();
        let b = JobId::new("app", model(2)).unwrap();
        let c = JobId::new("other", model(1)).unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn serde_uses_canonical_key() {
        let id = JobId::new("app", model(3)).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.encode()));

        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
