//! Abstraction over one connected proof worker.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{errors::ProverError, input::ProverInput};

/// Public inputs a worker reports alongside a final proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalPublicInputs {
    /// Hash of the public inputs as computed by the worker. Cross-checked
    /// against our independent computation before submission.
    pub input_hash: B256,
    pub new_local_exit_root: B256,
}

/// Proof payload in the form the settlement layer accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalProof {
    pub payload: String,
    pub public: FinalPublicInputs,
}

/// One connected worker, as seen by the scheduler.
///
/// `wait_*` calls block the calling task until the worker reports completion
/// or the call is cancelled from outside. Cancellation must not leave side
/// effects on stored state; releasing any held claim is the caller's job.
#[async_trait]
pub trait ProverChannel: Send + Sync {
    /// Stable identity string of the worker.
    fn id(&self) -> &str;

    /// Probe whether the worker can accept a job right now.
    async fn is_idle(&self) -> Result<bool, ProverError>;

    /// Dispatch a single-batch proof job. Returns the worker-issued job id.
    async fn start_batch_proof(&self, input: &ProverInput) -> Result<String, ProverError>;

    /// Dispatch an aggregation of two recursive proofs.
    async fn start_aggregation(
        &self,
        proof_a: &str,
        proof_b: &str,
    ) -> Result<String, ProverError>;

    /// Dispatch conversion of a recursive proof into the final form,
    /// binding it to the submitting aggregator address.
    async fn start_final_proof(
        &self,
        proof: &str,
        aggregator_addr: Address,
    ) -> Result<String, ProverError>;

    /// Wait for a recursive (batch or aggregated) proof job to finish.
    async fn wait_recursive_proof(&self, job_id: &str) -> Result<String, ProverError>;

    /// Wait for a final proof job to finish.
    async fn wait_final_proof(&self, job_id: &str) -> Result<FinalProof, ProverError>;
}
