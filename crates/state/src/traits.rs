//! Contract the aggregator core uses against the persistence layer.

use crate::{
    errors::DbResult,
    types::{Batch, BatchRange, ProofRecord},
};

/// State collaborator interface.
///
/// Every method is atomic with respect to every other method. Methods that
/// touch more than one record are all-or-nothing: on error nothing has been
/// written. "Nothing matched" is `Ok(None)`, never an error.
pub trait StateDb: Send + Sync {
    /// Highest batch number the local view considers verified on the
    /// settlement layer.
    fn last_verified_batch(&self) -> DbResult<Option<u64>>;

    /// Look up a batch by number.
    fn batch_by_number(&self, number: u64) -> DbResult<Option<Batch>>;

    /// Earliest batch after `after` that no stored proof covers.
    fn next_unproven_batch(&self, after: u64) -> DbResult<Option<Batch>>;

    /// Some pair of completed, non-generating proofs with exactly adjacent
    /// ranges, in ascending order.
    fn adjacent_completed_proof_pair(&self) -> DbResult<Option<(ProofRecord, ProofRecord)>>;

    /// Insert a new proof record. Fails with `OverlappingRange` if any stored
    /// record's range intersects it.
    fn insert_proof(&self, record: &ProofRecord) -> DbResult<()>;

    /// Overwrite the stored record with the same range.
    fn update_proof(&self, record: &ProofRecord) -> DbResult<()>;

    /// Flip the `generating` bit on two records in one transaction. If either
    /// record is missing, neither is changed.
    fn set_generating_pair(
        &self,
        a: BatchRange,
        b: BatchRange,
        generating: bool,
    ) -> DbResult<()>;

    /// Delete the record covering exactly `range`.
    fn delete_proof(&self, range: BatchRange) -> DbResult<()>;

    /// Commit an aggregation in one transaction: insert `aggregated` (pass
    /// `None` to skip insertion when the aggregate was already submitted) and
    /// delete the two consumed records. Rolls back entirely on any failure.
    fn replace_with_aggregated(
        &self,
        aggregated: Option<&ProofRecord>,
        consumed_a: BatchRange,
        consumed_b: BatchRange,
    ) -> DbResult<()>;

    /// Clear out claims left behind by a crashed run: delete every
    /// incomplete record that is `generating` and release (clear the flag
    /// on) completed ones. Returns how many records were touched. Called
    /// once at startup, before any scheduler runs.
    fn purge_stale_claims(&self) -> DbResult<u64>;

    /// True if `range` is exactly a run of one or more complete
    /// externally-sequenced batch groups. A partially covered sequence must
    /// not be submitted as a final proof.
    fn contains_complete_sequences(&self, range: BatchRange) -> DbResult<bool>;

    /// Snapshot of all stored proof records, for status reporting.
    fn proof_records(&self) -> DbResult<Vec<ProofRecord>>;
}
