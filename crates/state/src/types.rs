use std::fmt;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Inclusive range of batch numbers a proof covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchRange {
    pub start: u64,
    pub end: u64,
}

impl BatchRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Range covering a single batch.
    pub fn single(batch: u64) -> Self {
        Self::new(batch, batch)
    }

    pub fn overlaps(&self, other: &BatchRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// True if `other` starts right after this range ends.
    pub fn adjoins(&self, other: &BatchRange) -> bool {
        self.end + 1 == other.start
    }

    /// Union of two adjacent ranges.
    pub fn join(&self, other: &BatchRange) -> BatchRange {
        debug_assert!(self.adjoins(other));
        BatchRange::new(self.start, other.end)
    }
}

impl fmt::Display for BatchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A stored proof, either over a single batch or an aggregation of a
/// contiguous batch range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRecord {
    pub batch_start: u64,
    pub batch_end: u64,
    /// Identity string of the worker that claimed this record. Never a live
    /// handle to the connection.
    pub prover_id: Option<String>,
    /// Job handle issued by the worker once work is dispatched.
    pub external_proof_id: Option<String>,
    /// Opaque serialized inputs handed to the worker.
    pub input_payload: Option<String>,
    /// Opaque proof payload. `None` until the worker completes the job.
    pub proof_payload: Option<String>,
    /// Lock bit. True while a worker is actively producing this record.
    pub generating: bool,
}

impl ProofRecord {
    /// Fresh claimed record for a single batch, locked by `prover_id`.
    pub fn claimed(batch: u64, prover_id: &str) -> Self {
        Self {
            batch_start: batch,
            batch_end: batch,
            prover_id: Some(prover_id.to_owned()),
            external_proof_id: None,
            input_payload: None,
            proof_payload: None,
            generating: true,
        }
    }

    pub fn range(&self) -> BatchRange {
        BatchRange::new(self.batch_start, self.batch_end)
    }

    /// A record is completed once the worker has delivered the proof payload.
    pub fn is_completed(&self) -> bool {
        self.proof_payload.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// A generating record with no proof payload. After a restart no worker
    /// will ever finish it, so the startup purge deletes it; a completed
    /// record that is still generating is merely released instead.
    pub fn is_stale_claim(&self) -> bool {
        self.generating && !self.is_completed()
    }
}

/// A unit of settlement-layer data, read-only to this crate. Produced by the
/// synchronizer and consumed when building prover inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub global_exit_root: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub l2_data: Vec<u8>,
}
