//! Binary model artifact handed between nodes together with a finished job.
//!
//! The encoding is protobuf (see [`proto`]); timestamps travel as ISO-8601
//! strings and keep millisecond precision across the round trip.
mod proto;
mod timestamp;

use prost::Message;
use time::OffsetDateTime;

use crate::{
    ModelId,
    error::{ModelError, ModelResult},
};
use proto::{ModelIdProto, ModelProto};

/// A trained model as stored and transferred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifact {
    pub id: ModelId,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    /// Opaque engine payload.
    pub data: Vec<u8>,
}

impl ModelArtifact {
    /// Serialize to the protobuf wire format.
    pub fn encode(&self) -> ModelResult<Vec<u8>> {
        let msg = ModelProto {
            id: Some(ModelIdProto {
                specification_hash: self.id.specification_hash().to_string(),
                content_hash: self.id.content_hash().to_string(),
                seed: self.id.seed(),
                language_code: self.id.language_code().to_string(),
            }),
            started_at: timestamp::format_iso(self.started_at)?,
            finished_at: timestamp::format_iso(self.finished_at)?,
            data: self.data.clone(),
        };
        Ok(msg.encode_to_vec())
    }

    /// Parse the protobuf wire format.
    pub fn decode(buf: &[u8]) -> ModelResult<Self> {
        let msg = ModelProto::decode(buf).map_err(|e| ModelError::Artifact(e.to_string()))?;

        let id = msg
            .id
            .ok_or_else(|| ModelError::Artifact("missing model id".into()))?;
        let id = ModelId::new(
            id.content_hash,
            id.specification_hash,
            id.seed,
            id.language_code,
        )
        .map_err(|e| ModelError::Artifact(format!("invalid model id: {e}")))?;

        Ok(Self {
            id,
            started_at: timestamp::parse_iso(&msg.started_at)?,
            finished_at: timestamp::parse_iso(&msg.finished_at)?,
            data: msg.data,
        })
    }
}
