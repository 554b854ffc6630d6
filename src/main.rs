use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use dht_ring::config::{Cli, NodeConfig};
use dht_ring::server::WebServer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = NodeConfig::from_cli(Cli::parse())?;
    let server = WebServer::bind(&config).await?;

    let cancellation_token = CancellationToken::new();
    let shutdown = cancellation_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for interrupts: {}", e);
            return;
        }
        info!("Received interrupt, shutting down");
        shutdown.cancel();
    });

    server.run(cancellation_token).await
}
