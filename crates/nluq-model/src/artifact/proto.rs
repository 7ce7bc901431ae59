//! Protobuf messages of the model artifact, declared with `prost` derives.
//!
//! Field numbers are part of the stored format and must not change.

#[derive(Clone, PartialEq, prost::Message)]
pub struct ModelIdProto {
    #[prost(string, tag = "1")]
    pub specification_hash: String,
    #[prost(string, tag = "2")]
    pub content_hash: String,
    #[prost(int32, tag = "3")]
    pub seed: i32,
    #[prost(string, tag = "4")]
    pub language_code: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ModelProto {
    #[prost(message, optional, tag = "1")]
    pub id: Option<ModelIdProto>,
    #[prost(string, tag = "2")]
    pub started_at: String,
    #[prost(string, tag = "3")]
    pub finished_at: String,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}
