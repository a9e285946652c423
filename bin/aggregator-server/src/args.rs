use std::path::PathBuf;

use argh::FromArgs;

/// Command-line arguments
#[derive(Debug, Clone, FromArgs)]
pub struct Args {
    /// path to the TOML configuration file
    #[argh(option, short = 'c', description = "path to configuration")]
    pub config: Option<PathBuf>,

    /// listen address for prover connections
    #[argh(option, description = "prover listener host:port")]
    pub prover_listen_addr: Option<String>,

    /// operator JSON-RPC host
    #[argh(option, description = "JSON-RPC host")]
    pub rpc_host: Option<String>,

    /// operator JSON-RPC port
    #[argh(option, description = "JSON-RPC port")]
    pub rpc_port: Option<u16>,

    /// settlement ledger JSON-RPC endpoint
    #[argh(option, description = "settlement RPC URL")]
    pub settlement_rpc: Option<String>,

    /// chain id baked into prover inputs
    #[argh(option, description = "chain id")]
    pub chain_id: Option<u64>,
}
