use thiserror::Error;
use zkagg_state::DbError;

/// Errors surfaced by a prover channel. All of these are retryable from the
/// scheduler's point of view except [`ProverError::Disconnected`], which ends
/// the per-prover loop.
#[derive(Debug, Error)]
pub enum ProverError {
    #[error("prover connection closed")]
    Disconnected,

    #[error("wait aborted by shutdown")]
    Cancelled,

    #[error("prover rejected job: {0}")]
    Rejected(String),

    #[error("prover returned wrong type for response: {0}")]
    BadResponse(String),

    #[error("transport: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement client: {0}")]
    Client(String),
}

/// Top-level error for one scheduler tick. Everything here is handled by
/// releasing any held claim and waiting for the next tick; nothing is fatal
/// to the process.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("db: {0}")]
    Db(#[from] DbError),

    #[error("prover: {0}")]
    Prover(#[from] ProverError),

    #[error("settlement: {0}")]
    Settlement(#[from] SettlementError),

    #[error("failed to serialize prover input: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AggregatorError {
    /// True if the underlying prover connection is gone and the per-prover
    /// loop should end instead of backing off.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, AggregatorError::Prover(ProverError::Disconnected))
    }
}
