//! Operator-facing JSON-RPC server.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use jsonrpsee::{
    core::RpcResult,
    types::{ErrorObject, ErrorObjectOwned},
};
use tracing::{info, warn};
use zkagg_aggregator::AggregatorServer;
use zkagg_rpc_api::{AggregatorApiServer, ProofSummary, StatusReport};
use zkagg_state::StateDb;
use zkagg_tasks::ShutdownGuard;

fn to_rpc_error(err: impl ToString) -> ErrorObjectOwned {
    ErrorObject::owned(-32000, err.to_string(), None::<()>)
}

pub(crate) struct AggregatorRpcImpl {
    server: Arc<AggregatorServer>,
    db: Arc<dyn StateDb>,
}

impl AggregatorRpcImpl {
    pub(crate) fn new(server: Arc<AggregatorServer>, db: Arc<dyn StateDb>) -> Self {
        Self { server, db }
    }
}

#[async_trait]
impl AggregatorApiServer for AggregatorRpcImpl {
    async fn health(&self) -> RpcResult<bool> {
        Ok(true)
    }

    async fn status(&self) -> RpcResult<StatusReport> {
        let last_verified_batch = self.db.last_verified_batch().map_err(to_rpc_error)?;
        let proofs = self
            .db
            .proof_records()
            .map_err(to_rpc_error)?
            .into_iter()
            .map(|record| ProofSummary {
                range: record.range(),
                prover_id: record.prover_id.clone(),
                generating: record.generating,
                completed: record.is_completed(),
            })
            .collect();
        Ok(StatusReport {
            last_verified_batch,
            connected_provers: self.server.connected_provers(),
            proofs,
        })
    }
}

/// Runs the RPC server until shutdown.
pub(crate) async fn start(
    rpc_impl: AggregatorRpcImpl,
    rpc_addr: String,
    shutdown: ShutdownGuard,
) -> anyhow::Result<()> {
    let module = rpc_impl.into_rpc();

    let rpc_server = jsonrpsee::server::ServerBuilder::new()
        .build(&rpc_addr)
        .await
        .context("building operator rpc server")?;
    let rpc_handle = rpc_server.start(module);
    info!(%rpc_addr, "operator RPC server started");

    shutdown.wait_for_shutdown().await;
    info!("stopping operator RPC server");
    if rpc_handle.stop().is_err() {
        warn!("rpc server already stopped");
    }
    Ok(())
}
