//! In-memory [`StateDb`] implementation.
//!
//! Every trait method takes the single write lock for its whole duration,
//! which gives the same atomicity the contract demands of a real storage
//! backend. Used by tests and dev-mode deployments.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    errors::{DbError, DbResult},
    traits::StateDb,
    types::{Batch, BatchRange, ProofRecord},
};

#[derive(Debug, Default)]
struct Inner {
    /// Batches by number, as fed by the synchronizer.
    batches: BTreeMap<u64, Batch>,
    /// Proof records keyed by their range start. Ranges never overlap, so the
    /// start is a unique key.
    proofs: BTreeMap<u64, ProofRecord>,
    /// Local view of the settlement watermark.
    last_verified: Option<u64>,
    /// Closed sequence group ranges, ascending. Empty means sequence
    /// bookkeeping is not wired up and every range counts as complete.
    sequences: Vec<BatchRange>,
}

#[derive(Debug, Default)]
pub struct MemStateDb {
    inner: RwLock<Inner>,
}

impl MemStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a batch into the store, as the synchronizer collaborator would.
    pub fn put_batch(&self, batch: Batch) {
        self.inner.write().batches.insert(batch.number, batch);
    }

    /// Move the local settlement watermark.
    pub fn set_last_verified(&self, batch: u64) {
        self.inner.write().last_verified = Some(batch);
    }

    /// Register a closed sequence group.
    pub fn add_sequence(&self, range: BatchRange) {
        self.inner.write().sequences.push(range);
    }
}

impl Inner {
    fn overlapping(&self, range: &BatchRange) -> Option<BatchRange> {
        self.proofs
            .values()
            .map(|p| p.range())
            .find(|r| r.overlaps(range))
    }

    fn remove_exact(&mut self, range: BatchRange) -> DbResult<ProofRecord> {
        match self.proofs.remove(&range.start) {
            Some(rec) if rec.range() == range => Ok(rec),
            Some(rec) => {
                // Different range under the same start key; put it back.
                self.proofs.insert(rec.batch_start, rec);
                Err(DbError::MissingProof(range))
            }
            None => Err(DbError::MissingProof(range)),
        }
    }
}

impl StateDb for MemStateDb {
    fn last_verified_batch(&self) -> DbResult<Option<u64>> {
        Ok(self.inner.read().last_verified)
    }

    fn batch_by_number(&self, number: u64) -> DbResult<Option<Batch>> {
        Ok(self.inner.read().batches.get(&number).cloned())
    }

    fn next_unproven_batch(&self, after: u64) -> DbResult<Option<Batch>> {
        let inner = self.inner.read();
        for (num, batch) in inner.batches.range(after + 1..) {
            let covered = inner
                .proofs
                .values()
                .any(|p| p.batch_start <= *num && *num <= p.batch_end);
            if !covered {
                return Ok(Some(batch.clone()));
            }
        }
        Ok(None)
    }

    fn adjacent_completed_proof_pair(&self) -> DbResult<Option<(ProofRecord, ProofRecord)>> {
        let inner = self.inner.read();
        let records: Vec<&ProofRecord> = inner.proofs.values().collect();
        for pair in records.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.range().adjoins(&b.range())
                && !a.generating
                && !b.generating
                && a.is_completed()
                && b.is_completed()
            {
                return Ok(Some((a.clone(), b.clone())));
            }
        }
        Ok(None)
    }

    fn insert_proof(&self, record: &ProofRecord) -> DbResult<()> {
        let mut inner = self.inner.write();
        let range = record.range();
        if inner.overlapping(&range).is_some() {
            return Err(DbError::OverlappingRange(range));
        }
        inner.proofs.insert(range.start, record.clone());
        Ok(())
    }

    fn update_proof(&self, record: &ProofRecord) -> DbResult<()> {
        let mut inner = self.inner.write();
        let range = record.range();
        match inner.proofs.get_mut(&range.start) {
            Some(existing) if existing.range() == range => {
                *existing = record.clone();
                Ok(())
            }
            _ => Err(DbError::MissingProof(range)),
        }
    }

    fn set_generating_pair(&self, a: BatchRange, b: BatchRange, generating: bool) -> DbResult<()> {
        let mut inner = self.inner.write();
        // Validate both before touching either, so a miss changes nothing.
        for range in [a, b] {
            match inner.proofs.get(&range.start) {
                Some(rec) if rec.range() == range => {}
                _ => return Err(DbError::MissingProof(range)),
            }
        }
        for range in [a, b] {
            if let Some(rec) = inner.proofs.get_mut(&range.start) {
                rec.generating = generating;
            }
        }
        Ok(())
    }

    fn delete_proof(&self, range: BatchRange) -> DbResult<()> {
        self.inner.write().remove_exact(range)?;
        Ok(())
    }

    fn replace_with_aggregated(
        &self,
        aggregated: Option<&ProofRecord>,
        consumed_a: BatchRange,
        consumed_b: BatchRange,
    ) -> DbResult<()> {
        let mut inner = self.inner.write();
        let removed_a = inner.remove_exact(consumed_a)?;
        let removed_b = match inner.remove_exact(consumed_b) {
            Ok(rec) => rec,
            Err(e) => {
                // Roll back the first deletion.
                inner.proofs.insert(consumed_a.start, removed_a);
                return Err(e);
            }
        };

        if let Some(record) = aggregated {
            let range = record.range();
            if inner.overlapping(&range).is_some() {
                inner.proofs.insert(consumed_a.start, removed_a);
                inner.proofs.insert(consumed_b.start, removed_b);
                return Err(DbError::OverlappingRange(range));
            }
            inner.proofs.insert(range.start, record.clone());
        }
        Ok(())
    }

    fn purge_stale_claims(&self) -> DbResult<u64> {
        let mut inner = self.inner.write();
        let stale: Vec<u64> = inner
            .proofs
            .iter()
            .filter(|(_, rec)| rec.is_stale_claim())
            .map(|(start, _)| *start)
            .collect();
        for start in &stale {
            inner.proofs.remove(start);
        }
        let mut released = 0;
        for rec in inner.proofs.values_mut() {
            if rec.generating {
                rec.generating = false;
                released += 1;
            }
        }
        if !stale.is_empty() || released > 0 {
            debug!(
                deleted = stale.len(),
                released, "purged stale proof claims"
            );
        }
        Ok(stale.len() as u64 + released)
    }

    fn contains_complete_sequences(&self, range: BatchRange) -> DbResult<bool> {
        let inner = self.inner.read();
        if inner.sequences.is_empty() {
            // No sequence bookkeeping wired up; nothing to refuse on.
            return Ok(true);
        }

        let mut cursor = range.start;
        loop {
            let Some(seq) = inner.sequences.iter().find(|s| s.start == cursor) else {
                return Ok(false);
            };
            if seq.end == range.end {
                return Ok(true);
            }
            if seq.end > range.end {
                return Ok(false);
            }
            cursor = seq.end + 1;
        }
    }

    fn proof_records(&self) -> DbResult<Vec<ProofRecord>> {
        Ok(self.inner.read().proofs.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, B256};

    use super::*;

    fn batch(number: u64) -> Batch {
        Batch {
            number,
            timestamp: 1_700_000_000 + number,
            global_exit_root: B256::repeat_byte(0x22),
            coinbase: Address::repeat_byte(0x33),
            state_root: B256::repeat_byte(0x44),
            l2_data: vec![0xde, 0xad],
        }
    }

    fn completed(start: u64, end: u64, payload: &str) -> ProofRecord {
        ProofRecord {
            batch_start: start,
            batch_end: end,
            prover_id: Some("prover-1".to_owned()),
            external_proof_id: Some("job-1".to_owned()),
            input_payload: None,
            proof_payload: Some(payload.to_owned()),
            generating: false,
        }
    }

    #[test]
    fn test_insert_rejects_overlap() {
        let db = MemStateDb::new();
        db.insert_proof(&completed(1, 10, "p1")).unwrap();

        let err = db.insert_proof(&completed(10, 12, "p2")).unwrap_err();
        assert!(matches!(err, DbError::OverlappingRange(_)));

        // Adjacent is fine.
        db.insert_proof(&completed(11, 20, "p2")).unwrap();
    }

    #[test]
    fn test_adjacent_pair_requires_adjacency() {
        let db = MemStateDb::new();
        db.insert_proof(&completed(1, 10, "p1")).unwrap();
        db.insert_proof(&completed(12, 20, "p2")).unwrap();
        assert!(db.adjacent_completed_proof_pair().unwrap().is_none());

        db.insert_proof(&completed(11, 11, "p3")).unwrap();
        let (a, b) = db.adjacent_completed_proof_pair().unwrap().unwrap();
        assert!(a.range().adjoins(&b.range()));
    }

    #[test]
    fn test_adjacent_pair_skips_generating_and_incomplete() {
        let db = MemStateDb::new();
        let mut a = completed(1, 10, "p1");
        a.generating = true;
        db.insert_proof(&a).unwrap();
        db.insert_proof(&completed(11, 20, "p2")).unwrap();
        assert!(db.adjacent_completed_proof_pair().unwrap().is_none());

        a.generating = false;
        a.proof_payload = None;
        db.update_proof(&a).unwrap();
        assert!(db.adjacent_completed_proof_pair().unwrap().is_none());
    }

    #[test]
    fn test_next_unproven_batch_skips_covered() {
        let db = MemStateDb::new();
        for n in 1..=5 {
            db.put_batch(batch(n));
        }
        db.insert_proof(&completed(1, 2, "p1")).unwrap();

        let next = db.next_unproven_batch(0).unwrap().unwrap();
        assert_eq!(next.number, 3);

        let next = db.next_unproven_batch(3).unwrap().unwrap();
        assert_eq!(next.number, 4);

        db.insert_proof(&completed(3, 5, "p2")).unwrap();
        assert!(db.next_unproven_batch(0).unwrap().is_none());
    }

    #[test]
    fn test_set_generating_pair_is_atomic() {
        let db = MemStateDb::new();
        db.insert_proof(&completed(1, 10, "p1")).unwrap();

        let err = db
            .set_generating_pair(BatchRange::new(1, 10), BatchRange::new(11, 20), true)
            .unwrap_err();
        assert!(matches!(err, DbError::MissingProof(_)));

        // First record untouched after the failed pair flip.
        let recs = db.proof_records().unwrap();
        assert!(!recs[0].generating);
    }

    #[test]
    fn test_replace_with_aggregated() {
        let db = MemStateDb::new();
        db.insert_proof(&completed(1, 10, "p1")).unwrap();
        db.insert_proof(&completed(11, 20, "p2")).unwrap();

        let agg = completed(1, 20, "p1+p2");
        db.replace_with_aggregated(
            Some(&agg),
            BatchRange::new(1, 10),
            BatchRange::new(11, 20),
        )
        .unwrap();

        let recs = db.proof_records().unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].range(), BatchRange::new(1, 20));
    }

    #[test]
    fn test_replace_with_aggregated_none_only_deletes() {
        let db = MemStateDb::new();
        db.insert_proof(&completed(1, 10, "p1")).unwrap();
        db.insert_proof(&completed(11, 20, "p2")).unwrap();

        db.replace_with_aggregated(None, BatchRange::new(1, 10), BatchRange::new(11, 20))
            .unwrap();
        assert!(db.proof_records().unwrap().is_empty());
    }

    #[test]
    fn test_replace_rolls_back_on_missing_second() {
        let db = MemStateDb::new();
        db.insert_proof(&completed(1, 10, "p1")).unwrap();

        let agg = completed(1, 20, "p1+p2");
        let err = db
            .replace_with_aggregated(
                Some(&agg),
                BatchRange::new(1, 10),
                BatchRange::new(11, 20),
            )
            .unwrap_err();
        assert!(matches!(err, DbError::MissingProof(_)));

        // The first record must still be there.
        let recs = db.proof_records().unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].range(), BatchRange::new(1, 10));
    }

    #[test]
    fn test_purge_stale_claims() {
        let db = MemStateDb::new();
        // Claimed but never dispatched.
        db.insert_proof(&ProofRecord::claimed(5, "prover-1")).unwrap();

        // Dispatched but never finished; the job id does not save it.
        let mut dispatched = ProofRecord::claimed(6, "prover-1");
        dispatched.external_proof_id = Some("job-9".to_owned());
        db.insert_proof(&dispatched).unwrap();

        // Completed proof locked for aggregation at crash time.
        let mut locked = completed(7, 7, "p7");
        locked.generating = true;
        db.insert_proof(&locked).unwrap();

        assert_eq!(db.purge_stale_claims().unwrap(), 3);
        let recs = db.proof_records().unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].batch_start, 7);
        assert!(!recs[0].generating);

        // Idempotent.
        assert_eq!(db.purge_stale_claims().unwrap(), 0);
    }

    #[test]
    fn test_complete_sequences() {
        let db = MemStateDb::new();
        // No sequence info: everything counts as complete.
        assert!(db
            .contains_complete_sequences(BatchRange::new(1, 20))
            .unwrap());

        db.add_sequence(BatchRange::new(1, 10));
        db.add_sequence(BatchRange::new(11, 20));

        assert!(db
            .contains_complete_sequences(BatchRange::new(1, 10))
            .unwrap());
        assert!(db
            .contains_complete_sequences(BatchRange::new(1, 20))
            .unwrap());
        assert!(db
            .contains_complete_sequences(BatchRange::new(11, 20))
            .unwrap());
        // Partial coverage of the second group.
        assert!(!db
            .contains_complete_sequences(BatchRange::new(1, 15))
            .unwrap());
        assert!(!db
            .contains_complete_sequences(BatchRange::new(2, 10))
            .unwrap());
    }
}
