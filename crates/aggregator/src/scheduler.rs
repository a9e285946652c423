//! Per-prover work loop.

use std::{sync::Arc, time::Duration};

use alloy_primitives::U256;
use serde_json::json;
use tracing::{debug, error, info, warn};
use zkagg_state::{Batch, ProofRecord, StateDb};
use zkagg_tasks::ShutdownGuard;

use crate::{
    errors::AggregatorError,
    input::build_prover_input,
    profitability::ProfitabilityGate,
    prover::ProverChannel,
    repository::ProofRepository,
    submitter::FinalProofSubmitter,
    settlement::SettlementClient,
};

/// Drives one connected prover. Each tick tries, in order, to aggregate two
/// existing proofs and to prove a fresh batch; a tick that produced work is
/// followed immediately by another, otherwise the loop backs off for the
/// configured interval. The loop ends on shutdown or when the prover
/// disconnects.
pub struct AggregationScheduler {
    prover: Arc<dyn ProverChannel>,
    repo: Arc<ProofRepository>,
    db: Arc<dyn StateDb>,
    gate: Arc<ProfitabilityGate>,
    submitter: Arc<FinalProofSubmitter>,
    settlement: Arc<dyn SettlementClient>,
    chain_id: u64,
    tick_interval: Duration,
}

impl AggregationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prover: Arc<dyn ProverChannel>,
        repo: Arc<ProofRepository>,
        db: Arc<dyn StateDb>,
        gate: Arc<ProfitabilityGate>,
        submitter: Arc<FinalProofSubmitter>,
        settlement: Arc<dyn SettlementClient>,
        chain_id: u64,
        tick_interval: Duration,
    ) -> Self {
        Self {
            prover,
            repo,
            db,
            gate,
            submitter,
            settlement,
            chain_id,
            tick_interval,
        }
    }

    pub async fn run(self, shutdown: ShutdownGuard) {
        info!(prover = self.prover.id(), "scheduler started");
        loop {
            if shutdown.should_shutdown() {
                break;
            }
            let produced = match self.tick(&shutdown).await {
                Ok(produced) => produced,
                Err(err) if err.is_disconnect() => {
                    info!(prover = self.prover.id(), "prover disconnected");
                    break;
                }
                Err(err) => {
                    warn!(prover = self.prover.id(), %err, "tick failed");
                    false
                }
            };
            if produced {
                // Keep going while there is work.
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown.wait_for_shutdown() => break,
            }
        }
        info!(prover = self.prover.id(), "scheduler stopped");
    }

    /// One scheduling round. Returns whether any proof was produced.
    async fn tick(&self, shutdown: &ShutdownGuard) -> Result<bool, AggregatorError> {
        if !self.prover.is_idle().await? {
            debug!(prover = self.prover.id(), "prover busy, skipping tick");
            return Ok(false);
        }
        if self.try_aggregate(shutdown).await? {
            return Ok(true);
        }
        self.try_prove_next_batch(shutdown).await
    }

    /// Claims an adjacent completed pair and merges it. Any failure after the
    /// claim releases both records before the error propagates.
    async fn try_aggregate(&self, shutdown: &ShutdownGuard) -> Result<bool, AggregatorError> {
        let Some((lower, upper)) = self.repo.claim_aggregation_pair().await? else {
            return Ok(false);
        };
        info!(
            prover = self.prover.id(),
            lower = %lower.range(),
            upper = %upper.range(),
            "aggregating proofs"
        );
        match self.run_aggregation(&lower, &upper, shutdown).await {
            Ok(()) => Ok(true),
            Err(err) => {
                if let Err(release_err) = self.repo.release_aggregation_pair(&lower, &upper) {
                    error!(
                        lower = %lower.range(),
                        upper = %upper.range(),
                        %release_err,
                        "failed to release claimed aggregation pair"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_aggregation(
        &self,
        lower: &ProofRecord,
        upper: &ProofRecord,
        shutdown: &ShutdownGuard,
    ) -> Result<(), AggregatorError> {
        // Claimed pairs are completed by construction.
        let payload_lower = lower.proof_payload.as_deref().unwrap_or_default();
        let payload_upper = upper.proof_payload.as_deref().unwrap_or_default();

        let mut record = ProofRecord {
            batch_start: lower.batch_start,
            batch_end: upper.batch_end,
            prover_id: Some(self.prover.id().to_owned()),
            external_proof_id: None,
            input_payload: Some(
                json!({
                    "recursive_proof_1": payload_lower,
                    "recursive_proof_2": payload_upper,
                })
                .to_string(),
            ),
            proof_payload: None,
            generating: false,
        };

        let job_id = self
            .prover
            .start_aggregation(payload_lower, payload_upper)
            .await?;
        record.external_proof_id = Some(job_id.clone());
        record.proof_payload = Some(self.wait_recursive(&job_id, shutdown).await?);

        let sent = self.maybe_send_final(&record, shutdown).await;
        self.repo.commit_aggregated_proof(
            (!sent).then_some(&record),
            lower.range(),
            upper.range(),
        )?;
        Ok(())
    }

    /// Claims the next unproven batch and proves it. Failure after the claim
    /// deletes the placeholder record so the batch becomes claimable again.
    async fn try_prove_next_batch(
        &self,
        shutdown: &ShutdownGuard,
    ) -> Result<bool, AggregatorError> {
        let last_verified = self.db.last_verified_batch()?.unwrap_or(0);
        let Some((batch, record)) = self
            .repo
            .claim_next_batch(last_verified, self.prover.id())
            .await?
        else {
            return Ok(false);
        };
        info!(prover = self.prover.id(), batch = batch.number, "claimed batch for proving");

        // The collateral signal is not wired up; the threshold gate relies on
        // its time override.
        if !self.gate.is_profitable(U256::ZERO) {
            info!(batch = batch.number, "batch not profitable yet, releasing claim");
            self.repo.discard_batch_claim(record.range())?;
            return Ok(false);
        }

        match self.run_batch_proof(&batch, record.clone(), shutdown).await {
            Ok(()) => Ok(true),
            Err(err) => {
                if let Err(discard_err) = self.repo.discard_batch_claim(record.range()) {
                    error!(
                        batch = batch.number,
                        %discard_err,
                        "failed to discard batch claim"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_batch_proof(
        &self,
        batch: &Batch,
        mut record: ProofRecord,
        shutdown: &ShutdownGuard,
    ) -> Result<(), AggregatorError> {
        let input = build_prover_input(
            self.db.as_ref(),
            batch,
            self.chain_id,
            self.settlement.submitter_address(),
        )?;
        record.input_payload = Some(serde_json::to_string(&input)?);

        let job_id = self.prover.start_batch_proof(&input).await?;
        record.external_proof_id = Some(job_id.clone());
        // Persist the job handle before blocking, so the status report can
        // name the in-flight job.
        self.repo.record_dispatch(&record)?;

        record.proof_payload = Some(self.wait_recursive(&job_id, shutdown).await?);
        record.generating = false;

        let sent = self.maybe_send_final(&record, shutdown).await;
        self.repo.commit_batch_proof(&record, sent)?;
        Ok(())
    }

    /// Submission is opportunistic: a failed attempt keeps the proof for the
    /// next round instead of failing the tick that produced it.
    async fn maybe_send_final(&self, record: &ProofRecord, shutdown: &ShutdownGuard) -> bool {
        match self
            .submitter
            .try_send_final_proof(self.prover.as_ref(), record, shutdown)
            .await
        {
            Ok(sent) => sent,
            Err(err) => {
                warn!(range = %record.range(), %err, "final proof attempt failed");
                false
            }
        }
    }

    async fn wait_recursive(
        &self,
        job_id: &str,
        shutdown: &ShutdownGuard,
    ) -> Result<String, AggregatorError> {
        tokio::select! {
            res = self.prover.wait_recursive_proof(job_id) => Ok(res?),
            _ = shutdown.wait_for_shutdown() => {
                Err(crate::errors::ProverError::Cancelled.into())
            }
        }
    }
}
