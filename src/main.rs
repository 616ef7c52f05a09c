//! gopherd: serve a directory over Gopher.
//!
//! Directories are sent as listings, files as raw bytes. Configuration
//! comes from CLI arguments and an optional TOML file.

use std::sync::Arc;

use gopherd::config::Config;
use gopherd::{FileServer, LocalFs, Server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        root = %config.root.display(),
        follow_symlinks = config.follow_symlinks,
        host = %config.host,
        port = %config.port,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        max_request_bytes = config.max_request_bytes,
        "Starting gopherd"
    );

    let files = LocalFs::new(config.root).follow_symlinks(config.follow_symlinks);
    let server = Server::new(ServerConfig {
        addr: Some(config.listen),
        ext_host: config.host,
        ext_port: config.port,
        read_timeout: config.read_timeout,
        write_timeout: config.write_timeout,
        max_req_bytes: config.max_request_bytes,
        max_connections: config.max_connections,
        ..ServerConfig::new(Arc::new(FileServer::new(files)))
    });

    server.listen_and_serve().await?;
    Ok(())
}
