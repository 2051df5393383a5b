use dotenv::dotenv;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod block_processor;
mod chain;
mod clock;
mod config;
mod database;
mod models;
mod rpc;
mod sync;
mod utils;

#[cfg(test)]
mod testing;

use clock::TokioClock;
use config::Config;
use database::{BlockStore, PgStore};
use rpc::RpcClient;
use sync::Syncer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bitcoin_sync=info")),
        )
        .init();

    // Missing credentials are fatal; nothing past this point is.
    let config = Config::from_env()?;

    info!(pool_size = config.pool_size, "connecting to the database");
    let store = PgStore::connect(&config.database_url, config.pool_size).await?;
    store.init_schema().await?;
    store.log_contents().await?;
    info!("database schema ready");

    let rpc = RpcClient::new(&config.rpc)?;
    info!(endpoint = rpc.url(), timeout = ?config.rpc.timeout, "rpc client ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for ctrl-c, running until killed");
                // Keep the sender alive so the loop does not read this as a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    let mut syncer = Syncer::new(rpc, store, TokioClock, config.sync);
    syncer.run(shutdown_rx).await;

    Ok(())
}
