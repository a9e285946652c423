//! Settlement-layer collaborator contract.

use alloy_primitives::Address;
use async_trait::async_trait;
use zkagg_state::BatchRange;

use crate::{errors::SettlementError, prover::FinalProof};

/// Ledger client the submitter talks to. Submission mechanics (contract ABI,
/// signing, broadcast) live behind this trait.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Submit a final proof for `range`. Returns an opaque transaction handle.
    async fn submit_final_proof(
        &self,
        range: BatchRange,
        proof: &FinalProof,
    ) -> Result<String, SettlementError>;

    /// Highest batch number the settlement ledger itself has verified.
    async fn external_last_verified_batch(&self) -> Result<u64, SettlementError>;

    /// Address submissions are made from; baked into prover inputs.
    fn submitter_address(&self) -> Address;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicU64, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Records submissions; external watermark is settable by tests.
    pub(crate) struct MockSettlement {
        addr: Address,
        external_verified: AtomicU64,
        pub(crate) submissions: Mutex<Vec<(BatchRange, FinalProof)>>,
    }

    impl MockSettlement {
        pub(crate) fn new(external_verified: u64) -> Self {
            Self {
                addr: Address::repeat_byte(0xaa),
                external_verified: AtomicU64::new(external_verified),
                submissions: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn submissions(&self) -> Vec<(BatchRange, FinalProof)> {
            self.submissions.lock().clone()
        }
    }

    #[async_trait]
    impl SettlementClient for MockSettlement {
        async fn submit_final_proof(
            &self,
            range: BatchRange,
            proof: &FinalProof,
        ) -> Result<String, SettlementError> {
            self.submissions.lock().push((range, proof.clone()));
            Ok(format!("0xtx{}", range.start))
        }

        async fn external_last_verified_batch(&self) -> Result<u64, SettlementError> {
            Ok(self.external_verified.load(Ordering::Relaxed))
        }

        fn submitter_address(&self) -> Address {
            self.addr
        }
    }
}
