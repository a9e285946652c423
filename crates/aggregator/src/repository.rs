//! Claim-aware access layer over the proof table.
//!
//! Every scheduler task goes through one shared [`ProofRepository`]. The
//! in-process claim mutex serializes the select-then-mark window of the two
//! claim operations, so two schedulers can never walk away with overlapping
//! work even though the underlying store only guarantees per-call atomicity.

use std::sync::Arc;

use tokio::sync::Mutex;
use zkagg_state::{Batch, BatchRange, DbResult, ProofRecord, StateDb};

pub struct ProofRepository {
    db: Arc<dyn StateDb>,
    claim_lock: Mutex<()>,
}

impl ProofRepository {
    pub fn new(db: Arc<dyn StateDb>) -> Self {
        Self {
            db,
            claim_lock: Mutex::new(()),
        }
    }

    /// Clears out claims left behind by a previous instance that died
    /// mid-job. Run at startup, before any scheduler starts: incomplete
    /// generating rows are deleted (no worker will ever finish them, job id
    /// or not) and completed rows that were locked for aggregation get their
    /// lock cleared so they become claimable again.
    pub fn purge_stale_locks(&self) -> DbResult<u64> {
        self.db.purge_stale_claims()
    }

    /// Finds two adjacent completed proofs and marks both as generating in a
    /// single atomic step. Returns the claimed records with the generating
    /// flag already set, or `None` when no eligible pair exists.
    pub async fn claim_aggregation_pair(&self) -> DbResult<Option<(ProofRecord, ProofRecord)>> {
        let _guard = self.claim_lock.lock().await;
        let Some((mut lower, mut upper)) = self.db.adjacent_completed_proof_pair()? else {
            return Ok(None);
        };
        self.db
            .set_generating_pair(lower.range(), upper.range(), true)?;
        lower.generating = true;
        upper.generating = true;
        Ok(Some((lower, upper)))
    }

    /// Clears the generating flags of a claimed pair so another scheduler can
    /// pick it up again. The failure path counterpart of
    /// [`Self::claim_aggregation_pair`].
    pub fn release_aggregation_pair(&self, lower: &ProofRecord, upper: &ProofRecord) -> DbResult<()> {
        self.db
            .set_generating_pair(lower.range(), upper.range(), false)
    }

    /// Claims the next batch above the verified watermark by inserting a
    /// generating placeholder row for it. The row's range keys the claim;
    /// a concurrent claim of the same batch fails the insert with an
    /// overlapping-range error and the loser moves on.
    pub async fn claim_next_batch(
        &self,
        last_verified: u64,
        prover_id: &str,
    ) -> DbResult<Option<(Batch, ProofRecord)>> {
        let _guard = self.claim_lock.lock().await;
        let Some(batch) = self.db.next_unproven_batch(last_verified)? else {
            return Ok(None);
        };
        let record = ProofRecord::claimed(batch.number, prover_id);
        self.db.insert_proof(&record)?;
        Ok(Some((batch, record)))
    }

    /// Drops a batch claim outright. Used when proving fails or the batch is
    /// rejected before dispatch; the batch becomes claimable again.
    pub fn discard_batch_claim(&self, range: BatchRange) -> DbResult<()> {
        self.db.delete_proof(range)
    }

    /// Persists the external proof id (and input payload) once the prover has
    /// accepted the job, so status reporting can name the in-flight job.
    pub fn record_dispatch(&self, record: &ProofRecord) -> DbResult<()> {
        self.db.update_proof(record)
    }

    /// Replaces two consumed proofs with their aggregate in one atomic step.
    /// Pass `None` for the aggregate when it was already submitted as a final
    /// proof and only the consumed rows need to go.
    pub fn commit_aggregated_proof(
        &self,
        aggregated: Option<&ProofRecord>,
        consumed_lower: BatchRange,
        consumed_upper: BatchRange,
    ) -> DbResult<()> {
        self.db
            .replace_with_aggregated(aggregated, consumed_lower, consumed_upper)
    }

    /// Finalizes a batch proof: stores the completed record, or deletes the
    /// row when the proof already went out as a final proof.
    pub fn commit_batch_proof(&self, record: &ProofRecord, submitted: bool) -> DbResult<()> {
        if submitted {
            self.db.delete_proof(record.range())
        } else {
            self.db.update_proof(record)
        }
    }
}
