use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Batch {batch_id} is {status}; validation needs a completed batch")]
    NotReady { batch_id: String, status: String },

    #[error("Validator '{validator}' failed: {source}")]
    Validator {
        validator: &'static str,
        #[source]
        source: DatabaseError,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}
