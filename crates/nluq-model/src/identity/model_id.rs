use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    MODEL_ID_SEPARATOR,
    error::{ModelError, ModelResult},
};

/// Length of a half-md5 hash in hex digits.
const HASH_LEN: usize = 16;

/// Identifier of a trained model.
///
/// Canonical form: `{content_hash}.{specification_hash}.{seed}.{language_code}`.
///
/// Hashes are hex strings compared case-insensitively, so two ids whose canonical
/// strings differ only in hex case are the same model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId {
    content_hash: String,
    specification_hash: String,
    seed: i32,
    language_code: String,
}

impl ModelId {
    /// Build a validated model id.
    pub fn new(
        content_hash: impl Into<String>,
        specification_hash: impl Into<String>,
        seed: i32,
        language_code: impl Into<String>,
    ) -> ModelResult<Self> {
        let id = Self {
            content_hash: content_hash.into(),
            specification_hash: specification_hash.into(),
            seed,
            language_code: language_code.into(),
        };
        id.validate()?;
        Ok(id)
    }

    /// Returns `true` if `s` is a well-formed canonical model id.
    pub fn is_id(s: &str) -> bool {
        s.parse::<ModelId>().is_ok()
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn specification_hash(&self) -> &str {
        &self.specification_hash
    }

    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn language_code(&self) -> &str {
        &self.language_code
    }

    fn validate(&self) -> ModelResult<()> {
        if !is_half_md5(&self.content_hash) {
            return Err(ModelError::Invalid(format!(
                "content hash '{}' is not {HASH_LEN} hex digits",
                self.content_hash
            )));
        }
        if !is_half_md5(&self.specification_hash) {
            return Err(ModelError::Invalid(format!(
                "specification hash '{}' is not {HASH_LEN} hex digits",
                self.specification_hash
            )));
        }
        if !is_language_code(&self.language_code) {
            return Err(ModelError::Invalid(format!(
                "language code '{}' is not two lowercase letters",
                self.language_code
            )));
        }
        Ok(())
    }
}

fn is_half_md5(s: &str) -> bool {
    s.len() == HASH_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_language_code(s: &str) -> bool {
    s.len() == 2 && s.bytes().all(|b| b.is_ascii_lowercase())
}

impl PartialEq for ModelId {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash.eq_ignore_ascii_case(&other.content_hash)
            && self
                .specification_hash
                .eq_ignore_ascii_case(&other.specification_hash)
            && self.seed == other.seed
            && self.language_code == other.language_code
    }
}

impl Eq for ModelId {}

impl Hash for ModelId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.content_hash.bytes() {
            b.to_ascii_lowercase().hash(state);
        }
        for b in self.specification_hash.bytes() {
            b.to_ascii_lowercase().hash(state);
        }
        self.seed.hash(state);
        self.language_code.hash(state);
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = MODEL_ID_SEPARATOR;
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            self.content_hash, self.specification_hash, self.seed, self.language_code
        )
    }
}

impl FromStr for ModelId {
    type Err = ModelError;

    fn from_str(s: &str) -> ModelResult<Self> {
        let parts: Vec<&str> = s.split(MODEL_ID_SEPARATOR).collect();
        let &[content_hash, specification_hash, seed, language_code] = parts.as_slice() else {
            return Err(ModelError::parse(
                s,
                format!("expected 4 '{MODEL_ID_SEPARATOR}'-separated parts, got {}", parts.len()),
            ));
        };

        let seed = seed
            .parse::<i32>()
            .map_err(|e| ModelError::parse(s, format!("invalid seed '{seed}': {e}")))?;

        ModelId::new(content_hash, specification_hash, seed, language_code).map_err(|e| match e {
            ModelError::Invalid(reason) => ModelError::parse(s, reason),
            other => other,
        })
    }
}

impl TryFrom<String> for ModelId {
    type Error = ModelError;
    fn try_from(s: String) -> ModelResult<Self> {
        s.parse()
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.to_string()
    }
}
