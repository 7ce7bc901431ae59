//! Job identity: the composite key `(tenant, model)` used to address jobs
//! across storage and queue channels.
mod model_id;
pub use model_id::ModelId;

mod job_id;
pub use job_id::JobId;
