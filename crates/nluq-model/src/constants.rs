//! Separators of the canonical string forms.
//!
//! Each one is reserved inside the components it joins, so every canonical form decodes back unambiguously.

/// Joins the tenant id and the encoded model id of a [`crate::JobId`].
pub const JOB_KEY_SEPARATOR: char = '/';

/// Joins the four parts of a [`crate::ModelId`].
pub const MODEL_ID_SEPARATOR: char = '.';

/// Joins a queue id and a [`crate::ChannelKind`] into a broker channel name.
pub const CHANNEL_SEPARATOR: char = ':';
