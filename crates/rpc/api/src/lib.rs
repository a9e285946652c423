//! Operator-facing RPC surface of the aggregator server.

use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use serde::{Deserialize, Serialize};
use zkagg_state::BatchRange;

/// Snapshot of one stored proof for the status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofSummary {
    pub range: BatchRange,
    pub prover_id: Option<String>,
    pub generating: bool,
    pub completed: bool,
}

/// Overall view of the aggregation pipeline, as reported to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Highest batch the local state has seen verified.
    pub last_verified_batch: Option<u64>,
    /// Identity strings of the provers currently connected.
    pub connected_provers: Vec<String>,
    pub proofs: Vec<ProofSummary>,
}

#[cfg_attr(not(feature = "client"), rpc(server, namespace = "zkagg"))]
#[cfg_attr(feature = "client", rpc(server, client, namespace = "zkagg"))]
pub trait AggregatorApi {
    /// Liveness probe. Carries no scheduler logic.
    #[method(name = "health")]
    async fn health(&self) -> RpcResult<bool>;

    /// Current pipeline status: verified watermark, connected provers and the
    /// proof table contents.
    #[method(name = "status")]
    async fn status(&self) -> RpcResult<StatusReport>;
}
