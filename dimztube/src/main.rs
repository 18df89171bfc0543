mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use dimztube_core::{bootstrap::load_config, logging};

use server::DimzTubeServer;

/// DimzTube cast signaling server
#[derive(Debug, Parser)]
#[command(name = "dimztube", version, about)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "DIMZTUBE_CONFIG_PATH")]
    config: Option<String>,

    /// Override `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Override `server.http_port`
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.http_port = port;
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("DimzTube signaling server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Run until shutdown
    DimzTubeServer::new(config).start().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["dimztube", "--host", "127.0.0.1", "--port", "9000"]);
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(9000));
    }
}
