use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use faultline::{FaultServer, ServerError};

/// Programmable HTTP fault-injection and observability server
#[derive(Debug, Parser)]
#[command(name = "faultline", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "configs/default.json")]
    config: PathBuf,

    /// Run the terminal dashboard client instead of the server
    #[arg(long)]
    client: bool,

    /// WebSocket URL the dashboard client connects to
    #[arg(long, default_value = "ws://localhost:8080/ws")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.client {
        // The dashboard front-end ships as a separate binary
        tracing::error!(
            server = %cli.server,
            "this build does not include the dashboard client"
        );
        return Err(ServerError::Internal(
            "dashboard client not included in this build".to_string(),
        ));
    }

    let server = FaultServer::new(cli.config);
    server.start().await?;
    tracing::info!("server is running, press ctrl-c to stop");

    signal::ctrl_c()
        .await
        .map_err(|e| ServerError::Internal(format!("failed to listen for ctrl-c: {}", e)))?;

    tracing::info!("shutdown signal received");
    server.stop().await?;
    Ok(())
}
