//! serverkit
//!
//! Runs an application with the standard middleware stack, optionally
//! serving a static directory and a WebSocket endpoint.
//!
//! ```text
//! serverkit --config server.toml --static ./public --socket
//! ```

use clap::Parser;
use std::path::PathBuf;

use serverkit::config::loader::load_config;
use serverkit::config::ServerOptions;
use serverkit::observability::logging;
use serverkit::Server;

#[derive(Parser)]
#[command(name = "serverkit")]
#[command(about = "Express-style application server on axum", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve files from this directory at `/`
    #[arg(long = "static")]
    static_dir: Option<PathBuf>,

    /// Enable the WebSocket endpoint and echo broadcasts between clients
    #[arg(long)]
    socket: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init(logging::DEFAULT_DIRECTIVES)?;
    let cli = Cli::parse();

    tracing::info!("serverkit v{} starting", env!("CARGO_PKG_VERSION"));

    let mut options = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerOptions::default(),
    };
    if let Some(host) = cli.host {
        options.listener.host = host;
    }
    if let Some(port) = cli.port {
        options.listener.port = port;
    }

    tracing::info!(
        bind_address = %options.listener.bind_address(),
        csrf = options.app.csrf.is_some(),
        cors = options.app.cors.is_some(),
        "Configuration loaded"
    );

    let server = Server::new(options);
    if let Some(dir) = &cli.static_dir {
        server.serve_dir("/", dir)?;
    }
    if cli.socket {
        server.socket()?.on_connection(|mut socket| async move {
            while let Some(message) = socket.recv().await {
                socket.broadcast(message);
            }
        });
    }

    let address = server.listen(None).await?;
    tracing::info!(address = %address, "Listening for connections");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    server.close().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
