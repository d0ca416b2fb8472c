use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use parley_server::{server, telemetry, LogFormat, ServerConfig};

/// Parley signaling relay server.
#[derive(Debug, Parser)]
#[command(name = "parley-server", version, about)]
struct Cli {
    /// Address to listen on (overrides PARLEY_BIND_ADDR)
    #[arg(long, short)]
    bind: Option<SocketAddr>,

    /// Log output format (overrides PARLEY_LOG_FORMAT)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut server_config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?;
    if let Some(bind) = cli.bind {
        server_config.bind_addr = bind;
    }
    if let Some(format) = cli.log_format {
        server_config.log_format = format;
    }

    telemetry::init(server_config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!("Parley Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    server_config.log_config();

    server::start(server_config).await?;

    info!("Parley Server stopped");
    Ok(())
}
