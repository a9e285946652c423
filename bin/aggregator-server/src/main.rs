//! Proof aggregation server.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use args::Args;
use tokio::{net::TcpListener, runtime::Handle, sync::mpsc};
use tracing::{error, info};
use zkagg_aggregator::AggregatorServer;
use zkagg_common::logging;
use zkagg_state::MemStateDb;
use zkagg_tasks::TaskManager;

use crate::settlement::RpcSettlementClient;

mod args;
mod config;
mod rpc_server;
mod settlement;
mod transport;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    if let Err(err) = main_inner(args) {
        eprintln!("FATAL ERROR: {err}");
        return Err(err);
    }
    Ok(())
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("zkagg-rt")
        .build()
        .context("init: build rt")?;

    init_logging(runtime.handle());

    let config = config::get_config(&args)?;

    let task_manager = TaskManager::new(runtime.handle().clone());
    let executor = task_manager.executor();

    let db = Arc::new(MemStateDb::new());
    let settlement = runtime
        .block_on(RpcSettlementClient::connect(&config.settlement_rpc))
        .context("connecting to settlement ledger")?;

    let server = Arc::new(AggregatorServer::new(
        config.aggregator.clone(),
        db.clone(),
        Arc::new(settlement),
        executor.clone(),
    ));

    // Bind the prover listener up front; without it the server is useless, so
    // a bind failure terminates the process.
    let listener = runtime
        .block_on(TcpListener::bind(&config.prover_listen_addr))
        .with_context(|| format!("binding prover listener on {}", config.prover_listen_addr))?;
    info!(addr = %config.prover_listen_addr, "listening for prover connections");

    let (conn_tx, conn_rx) = mpsc::channel(8);
    executor.spawn_critical_async_with_shutdown("prover-listener", move |shutdown| {
        transport::accept_loop(listener, conn_tx, shutdown)
    });

    {
        let server = server.clone();
        executor.spawn_critical_async_with_shutdown("aggregator-server", move |shutdown| {
            async move {
                if let Err(err) = server.run(conn_rx, shutdown).await {
                    error!(%err, "aggregator server failed");
                }
            }
        });
    }

    let rpc_addr = format!("{}:{}", config.rpc_host, config.rpc_port);
    let rpc_impl = rpc_server::AggregatorRpcImpl::new(server, db);
    executor.spawn_critical_async_with_shutdown("main-rpc", move |shutdown| async move {
        if let Err(err) = rpc_server::start(rpc_impl, rpc_addr, shutdown).await {
            error!(%err, "operator rpc server failed");
        }
    });

    task_manager.start_signal_listeners();
    task_manager.monitor(Some(SHUTDOWN_TIMEOUT))?;

    info!("exiting");
    logging::finalize();
    Ok(())
}

/// Sets up the logging system given a handle to a runtime context to possibly
/// start the OTLP output on.
fn init_logging(rt: &Handle) {
    let mut lconfig = logging::LoggerConfig::with_base_name("zkagg-server");

    let otlp_url = logging::get_otlp_url_from_env();
    if let Some(url) = &otlp_url {
        lconfig.set_otlp_url(url.clone());
    }

    {
        // The OTLP batch exporter spawns onto the ambient runtime.
        let _g = rt.enter();
        logging::init(lconfig);
    }

    if let Some(url) = &otlp_url {
        info!(%url, "using OpenTelemetry tracing output");
    }
}
