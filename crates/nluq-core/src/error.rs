use thiserror::Error;

use nluq_model::ModelError;

use crate::{bus::BusError, cancel::CancelError};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("cancel error: {0}")]
    Cancel(#[from] CancelError),
}
