//! Wyvern server - encrypted game transport and save-data pipeline

mod config;
mod connection;
mod handlers;
mod messages;
mod session;
mod storage;

use anyhow::{Context, Result};
use clap::Parser;
use connection::ServerContext;
use session::SessionManager;
use socket2::{SockRef, TcpKeepalive};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::MemoryStore;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(author = "Wyvern Contributors")]
#[command(version)]
#[command(about = "Wyvern server - encrypted game transport", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "server.conf")]
    config: PathBuf,

    /// Override the configured listen address (host:port)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::Config::load(&args.config)
        .context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level in configuration")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Wyvern server v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", args.config.display());

    let ctx = Arc::new(ServerContext {
        store: Arc::new(MemoryStore::new()),
        cipher: config.session.cipher()?,
        deltas: Arc::new(config.session.delta_source()),
        sessions: Arc::new(SessionManager::new(config.general.max_concurrent_clients)),
        read_timeout: config.session.read_timeout(),
        log_packets: config.logging.log_packets,
        log_connections: config.logging.log_connections,
    });

    let bind_addr = args.bind.unwrap_or_else(|| config.bind_addr());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    info!("Server listening on {}", bind_addr);
    info!("Max concurrent clients: {}", config.general.max_concurrent_clients);
    info!("Read timeout: {} seconds", config.session.read_timeout_sec);

    let stats_sessions = ctx.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let active = stats_sessions.active_sessions().await;
            if active > 0 {
                debug!("Active sessions: {}", active);
            }
        }
    });

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Error accepting connection: {}", e);
                continue;
            }
        };

        if let Err(e) = tune_socket(&stream) {
            debug!("Failed to set socket options for {}: {}", peer_addr, e);
        }

        let Some(session_id) = ctx.sessions.create_session(peer_addr).await else {
            warn!("Rejecting {}: server full", peer_addr);
            continue;
        };
        if ctx.log_connections {
            info!(session_id, peer = %peer_addr, "Client connected");
        }

        tokio::spawn(connection::serve(stream, session_id, ctx.clone()));
    }
}

/// Disable Nagle and enable TCP keepalive so dead peers get noticed
fn tune_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))
}
