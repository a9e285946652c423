//! Final proof generation and submission.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use alloy_primitives::B256;
use tracing::{debug, error, info, warn};
use zkagg_state::{ProofRecord, StateDb};
use zkagg_tasks::ShutdownGuard;

use crate::{
    errors::{AggregatorError, ProverError},
    input::{public_input_hash, ProverInput},
    prover::{FinalProof, ProverChannel},
    settlement::SettlementClient,
};

/// Shared submission clock. The async mutex around `next_at` is held for the
/// whole duration of a submission attempt, which both enforces the minimum
/// interval between final proofs and guarantees at most one in-flight
/// submission across all schedulers; contenders take it with `try_lock` and
/// bail rather than queue behind a running submission. `last_at` is a cheap
/// read-side copy for the profitability gate, which runs on the sync path.
pub struct SubmissionSchedule {
    interval: Duration,
    next_at: tokio::sync::Mutex<Instant>,
    last_at: parking_lot::Mutex<Instant>,
}

impl SubmissionSchedule {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            next_at: tokio::sync::Mutex::new(now + interval),
            last_at: parking_lot::Mutex::new(now),
        }
    }

    pub fn elapsed_since_last_submission(&self) -> Duration {
        self.last_at.lock().elapsed()
    }

    /// Records a completed submission and arms the next deadline. Callers on
    /// the submission path update `next_at` through the guard they already
    /// hold; this only refreshes the read-side copy.
    pub fn note_submission(&self) {
        *self.last_at.lock() = Instant::now();
    }
}

/// Drives a completed proof through the final-proof pipeline when the ledger
/// is ready for it.
pub struct FinalProofSubmitter {
    db: Arc<dyn StateDb>,
    settlement: Arc<dyn SettlementClient>,
    schedule: Arc<SubmissionSchedule>,
    sync_poll_interval: Duration,
    mock_exit_root: Option<B256>,
}

impl FinalProofSubmitter {
    pub fn new(
        db: Arc<dyn StateDb>,
        settlement: Arc<dyn SettlementClient>,
        schedule: Arc<SubmissionSchedule>,
        sync_poll_interval: Duration,
        mock_exit_root: Option<B256>,
    ) -> Self {
        Self {
            db,
            settlement,
            schedule,
            sync_poll_interval,
            mock_exit_root,
        }
    }

    /// Attempts to turn `record` into a final proof and submit it. Returns
    /// `Ok(true)` only on a successful submission; every gate that is not yet
    /// open returns `Ok(false)` so the caller keeps the proof around.
    ///
    /// The submission deadline is checked and advanced under a single lock
    /// acquisition, so concurrent schedulers cannot both pass the deadline
    /// check before either of them updates it. The lock is taken with
    /// `try_lock`: a scheduler that finds a submission already in flight
    /// reports "not yet" immediately and goes on to persist its proof.
    pub async fn try_send_final_proof(
        &self,
        prover: &dyn ProverChannel,
        record: &ProofRecord,
        shutdown: &ShutdownGuard,
    ) -> Result<bool, AggregatorError> {
        let Ok(mut next_at) = self.schedule.next_at.try_lock() else {
            debug!(range = %record.range(), "another submission in flight");
            return Ok(false);
        };
        if Instant::now() < *next_at {
            return Ok(false);
        }
        debug!(range = %record.range(), "final proof submission window open");

        // Our view of the verified watermark must have caught up with the
        // settlement ledger before the next-to-verify check means anything.
        while !self.is_synced().await? {
            info!("local state behind settlement ledger, waiting");
            tokio::select! {
                _ = tokio::time::sleep(self.sync_poll_interval) => {}
                _ = shutdown.wait_for_shutdown() => return Ok(false),
            }
        }

        let Some(last_verified) = self.db.last_verified_batch()? else {
            debug!("no verified batch yet, holding final proof");
            return Ok(false);
        };
        if record.batch_start != last_verified + 1 {
            debug!(
                range = %record.range(),
                next_to_verify = last_verified + 1,
                "proof does not start at the next batch to verify"
            );
            return Ok(false);
        }
        if !self.db.contains_complete_sequences(record.range())? {
            debug!(range = %record.range(), "proof spans an incomplete sequence");
            return Ok(false);
        }
        let Some(payload) = record.proof_payload.as_deref() else {
            warn!(range = %record.range(), "submission candidate has no proof payload");
            return Ok(false);
        };

        info!(range = %record.range(), prover = prover.id(), "generating final proof");
        let job_id = prover
            .start_final_proof(payload, self.settlement.submitter_address())
            .await?;
        let final_proof = tokio::select! {
            res = prover.wait_final_proof(&job_id) => res?,
            _ = shutdown.wait_for_shutdown() => {
                return Err(ProverError::Cancelled.into());
            }
        };

        self.cross_check(record, &final_proof);

        let tx = self
            .settlement
            .submit_final_proof(record.range(), &final_proof)
            .await?;
        info!(range = %record.range(), %tx, "final proof submitted");

        *next_at = Instant::now() + self.schedule.interval;
        self.schedule.note_submission();
        Ok(true)
    }

    async fn is_synced(&self) -> Result<bool, AggregatorError> {
        let local = self.db.last_verified_batch()?.unwrap_or(0);
        let external = self.settlement.external_last_verified_batch().await?;
        Ok(local >= external)
    }

    /// Advisory sanity checks on the final proof's public signals. A mismatch
    /// is loud but does not block submission; the settlement layer is the
    /// authority on validity.
    fn cross_check(&self, record: &ProofRecord, final_proof: &FinalProof) {
        if let Some(mock) = self.mock_exit_root {
            if final_proof.public.new_local_exit_root == mock {
                warn!(
                    range = %record.range(),
                    "final proof carries the configured mock exit root, prover \
                     is likely running in mock mode"
                );
            }
        }

        let Some(raw_input) = record.input_payload.as_deref() else {
            return;
        };
        let input: ProverInput = match serde_json::from_str(raw_input) {
            Ok(input) => input,
            Err(err) => {
                warn!(range = %record.range(), %err, "stored input payload is not parseable");
                return;
            }
        };
        let expected = public_input_hash(&input.public_inputs);
        if final_proof.public.input_hash != expected {
            error!(
                range = %record.range(),
                %expected,
                got = %final_proof.public.input_hash,
                "final proof public input hash does not match the batch inputs"
            );
        }
    }
}
