//! Bootstrap binary for the portico engine.
//!
//! Loads configuration, initializes tracing, and runs a server in the
//! configured mode. Handlers are an embedding concern: this binary registers
//! none, so in `direct` mode every request is answered with the engine's
//! 400 rejection. The `tls-surrogate` mode is fully usable from here.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portico::dispatch::Handler;
use portico::{EngineConfig, Server};

#[derive(Debug, Parser)]
#[command(name = "portico", about = "Embeddable HTTP/1.1 server engine")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "portico.toml")]
    config: PathBuf,

    /// Override the configured listening port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        EngineConfig::load(&args.config)?
    } else {
        EngineConfig::default()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = args.port.unwrap_or(config.port);
    let mode = config.server_mode()?;
    let handlers: Vec<Arc<dyn Handler>> = Vec::new();

    let server = Server::start(port, handlers, mode, config.bind_scope()).await?;
    tracing::info!(
        port = server.port(),
        mode = ?config.mode,
        "portico started"
    );

    // No shutdown primitive exists; the server runs until the process exits.
    std::future::pending::<()>().await;
    Ok(())
}
