use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use editor_mcp_bridge::config::BridgeConfig;
use editor_mcp_bridge::logging::init_logging;
use editor_mcp_bridge::mcp::server::run_server;

/// MCP bridge between AI clients and a running game editor
#[derive(Parser, Debug)]
#[command(name = "editor-mcp-bridge", version, about)]
struct Args {
    /// JSON configuration file
    #[arg(short, long, default_value = "editor-bridge.json")]
    config: PathBuf,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Directory for daily rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn load_config(args: Args) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = BridgeConfig::load(&args.config)?;
    config.apply_env()?;

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(dir) = args.log_dir {
        config.logging.directory = Some(dir);
    }

    config.validate()?;
    Ok(config)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let _guard = init_logging(&config.logging);
    info!(
        "Starting editor MCP bridge (snapshot stale after {}s, command timeout {}s)",
        config.snapshot_stale_after_secs, config.command_timeout_secs
    );

    if let Err(e) = run_server(config).await {
        error!("Server error: {}", e);
        return Err(e);
    }
    Ok(())
}
