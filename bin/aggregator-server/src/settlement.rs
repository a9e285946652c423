//! Settlement ledger client over JSON-RPC.

use alloy_primitives::Address;
use async_trait::async_trait;
use jsonrpsee::{http_client::HttpClient, proc_macros::rpc};
use zkagg_aggregator::{
    errors::SettlementError,
    prover::FinalProof,
    settlement::SettlementClient,
};
use zkagg_state::BatchRange;

/// RPC surface the settlement service exposes to aggregators.
#[rpc(client, namespace = "settlement")]
pub trait SettlementLedgerApi {
    /// Highest batch number the ledger has verified.
    #[method(name = "lastVerifiedBatch")]
    async fn last_verified_batch(&self) -> RpcResult<u64>;

    /// Submit a final proof covering `[batch_start, batch_end]`. Returns the
    /// transaction handle.
    #[method(name = "submitFinalProof")]
    async fn submit_final_proof(
        &self,
        batch_start: u64,
        batch_end: u64,
        proof: FinalProof,
    ) -> RpcResult<String>;

    /// Address the aggregator submits from.
    #[method(name = "submitterAddress")]
    async fn submitter_address(&self) -> RpcResult<Address>;
}

/// [`SettlementClient`] backed by the ledger's JSON-RPC endpoint. The
/// submitter address is fetched once at connect time; it does not change for
/// the lifetime of the process.
pub struct RpcSettlementClient {
    client: HttpClient,
    submitter: Address,
}

impl RpcSettlementClient {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = jsonrpsee::http_client::HttpClientBuilder::default().build(url)?;
        let submitter = SettlementLedgerApiClient::submitter_address(&client).await?;
        Ok(Self { client, submitter })
    }
}

#[async_trait]
impl SettlementClient for RpcSettlementClient {
    async fn submit_final_proof(
        &self,
        range: BatchRange,
        proof: &FinalProof,
    ) -> Result<String, SettlementError> {
        SettlementLedgerApiClient::submit_final_proof(
            &self.client,
            range.start,
            range.end,
            proof.clone(),
        )
        .await
        .map_err(|err| SettlementError::Client(err.to_string()))
    }

    async fn external_last_verified_batch(&self) -> Result<u64, SettlementError> {
        SettlementLedgerApiClient::last_verified_batch(&self.client)
            .await
            .map_err(|err| SettlementError::Client(err.to_string()))
    }

    fn submitter_address(&self) -> Address {
        self.submitter
    }
}
