use thiserror::Error;

use crate::types::BatchRange;

/// Simple result type used across the database interface.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("tried to insert proof {0} overlapping an existing record")]
    OverlappingRange(BatchRange),

    #[error("missing proof record for range {0}")]
    MissingProof(BatchRange),

    #[error("missing batch {0}")]
    MissingBatch(u64),

    #[error("transaction aborted: {0}")]
    TxAborted(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for DbError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
