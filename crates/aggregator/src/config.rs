use std::time::Duration;

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

fn default_tick_interval() -> u64 {
    3
}

fn default_final_proof_interval() -> u64 {
    900
}

/// Profitability strategy selected once at construction from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ProfitabilityConfig {
    /// Accept every batch. Used in permissive and test deployments.
    AcceptAll,
    /// Accept a batch if the offered collateral clears `min_reward`, or if
    /// `submit_anyway_after_secs` have passed since the last submission.
    Threshold {
        min_reward: U256,
        submit_anyway_after_secs: u64,
    },
}

impl Default for ProfitabilityConfig {
    fn default() -> Self {
        ProfitabilityConfig::AcceptAll
    }
}

/// Recognized aggregator options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Per-prover tick interval in seconds. Also the poll interval for the
    /// settlement sync wait.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Minimum interval between final-proof submissions, in seconds. One
    /// shared deadline across all provers.
    #[serde(default = "default_final_proof_interval")]
    pub final_proof_interval_secs: u64,

    /// Chain identifier baked into prover inputs.
    pub chain_id: u64,

    #[serde(default)]
    pub profitability: ProfitabilityConfig,

    /// Exit-root literal reported by a mock prover in staging deployments.
    /// When the final proof carries this value the submitter logs a warning
    /// instead of treating it as real. Leave unset in production.
    #[serde(default)]
    pub mock_exit_root: Option<B256>,
}

impl AggregatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn final_proof_interval(&self) -> Duration {
        Duration::from_secs(self.final_proof_interval_secs)
    }
}
