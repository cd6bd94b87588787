use crate::commands::ExecutorArgs;
use crate::config::CliConfig;
use crate::output;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use txs_engine::{memory_registry, MemoryPersistence, TransactionExecutor};

/// Serve POST /txs over HTTP with the in-memory backend
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides the configuration file)
    #[arg(long, short = 'b', value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    #[command(flatten)]
    pub executor: ExecutorArgs,
}

pub async fn execute(args: ServeArgs, config: CliConfig) -> Result<()> {
    let bind = args.bind.unwrap_or(config.bind);

    let store = MemoryPersistence::new();
    config.seed(&store);

    let registry = memory_registry();
    output::note(&format!(
        "{} handlers registered, {} organizations seeded",
        registry.len(),
        config.organizations.len()
    ));

    let executor = TransactionExecutor::new(Arc::new(store), registry)
        .with_config(args.executor.apply(config.executor));
    let router = txs_rpc::router(executor);

    output::action("Listening", &format!("http://{}", bind));
    txs_rpc::serve(bind, router, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", e);
        }
    })
    .await?;

    output::verdict(true, "Server stopped");
    Ok(())
}
