// Typed errors for ingestion, storage and the aggregate cache.

use std::time::Duration;
use thiserror::Error;

use crate::models::EntityId;
use crate::time_grid::Bucket;

/// Rejected submission. Nothing has been written when this is returned.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("aggregation of entity {entity_id} bucket {bucket} failed: {reason}")]
    Computation {
        entity_id: EntityId,
        bucket: Bucket,
        reason: String,
    },

    #[error("blob codec error: {0}")]
    Codec(String),
}

/// Outcome shared by every caller waiting on the same computation, hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("aggregate computation failed: {0}")]
    Computation(String),

    #[error("aggregate computation timed out after {0:?}")]
    Timeout(Duration),

    #[error("aggregate store error: {0}")]
    Store(String),

    #[error("aggregation cache is shut down")]
    ShuttingDown,
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Computation { .. } => CacheError::Computation(e.to_string()),
            other => CacheError::Store(other.to_string()),
        }
    }
}
