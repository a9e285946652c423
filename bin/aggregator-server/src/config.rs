use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use zkagg_aggregator::AggregatorConfig;

use crate::args::Args;

fn default_prover_listen_addr() -> String {
    "0.0.0.0:6544".to_owned()
}

fn default_rpc_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_rpc_port() -> u16 {
    6545
}

fn default_settlement_rpc() -> String {
    "http://127.0.0.1:8545".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where provers connect. Failure to bind this is fatal.
    #[serde(default = "default_prover_listen_addr")]
    pub prover_listen_addr: String,

    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default = "default_settlement_rpc")]
    pub settlement_rpc: String,

    pub aggregator: AggregatorConfig,
}

/// Loads the config file if one was given and applies argument overrides on
/// top. Arguments take precedence over the file.
pub fn get_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match args.config.as_deref() {
        Some(path) => load_configuration(path)?,
        None => Config {
            prover_listen_addr: default_prover_listen_addr(),
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            settlement_rpc: default_settlement_rpc(),
            aggregator: AggregatorConfig {
                tick_interval_secs: 3,
                final_proof_interval_secs: 900,
                chain_id: 0,
                profitability: Default::default(),
                mock_exit_root: None,
            },
        },
    };
    update_from_args(&mut config, args);
    if config.aggregator.chain_id == 0 {
        anyhow::bail!("no chain id configured, set it in the config file or via --chain-id");
    }
    Ok(config)
}

fn load_configuration(path: &Path) -> anyhow::Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&config_str).context("parsing config file")
}

fn update_from_args(config: &mut Config, args: &Args) {
    if let Some(addr) = &args.prover_listen_addr {
        config.prover_listen_addr = addr.clone();
    }
    if let Some(host) = &args.rpc_host {
        config.rpc_host = host.clone();
    }
    if let Some(port) = args.rpc_port {
        config.rpc_port = port;
    }
    if let Some(url) = &args.settlement_rpc {
        config.settlement_rpc = url.clone();
    }
    if let Some(chain_id) = args.chain_id {
        config.aggregator.chain_id = chain_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_toml() {
        let config: Config = toml::from_str(
            r#"
            prover_listen_addr = "0.0.0.0:7000"

            [aggregator]
            chain_id = 1001
            tick_interval_secs = 5

            [aggregator.profitability]
            strategy = "accept_all"
            "#,
        )
        .unwrap();
        assert_eq!(config.prover_listen_addr, "0.0.0.0:7000");
        assert_eq!(config.rpc_port, 6545);
        assert_eq!(config.aggregator.chain_id, 1001);
        assert_eq!(config.aggregator.tick_interval_secs, 5);
    }

    #[test]
    fn test_args_override_file_defaults() {
        let args = Args {
            config: None,
            prover_listen_addr: None,
            rpc_host: None,
            rpc_port: Some(9000),
            settlement_rpc: None,
            chain_id: Some(42),
        };
        let config = get_config(&args).unwrap();
        assert_eq!(config.rpc_port, 9000);
        assert_eq!(config.aggregator.chain_id, 42);
    }

    #[test]
    fn test_missing_chain_id_rejected() {
        let args = Args {
            config: None,
            prover_listen_addr: None,
            rpc_host: None,
            rpc_port: None,
            settlement_rpc: None,
            chain_id: None,
        };
        assert!(get_config(&args).is_err());
    }
}
