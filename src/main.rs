//! Tickroom Server
//!
//! Runs the bundled snake demo behind the WebSocket dispatcher. Every new
//! connection enters the demo lobby.

use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tickroom::{
    demo,
    network::{GameServer, ServerConfig},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServerConfig::from_env();
    info!("Tickroom Server v{}", VERSION);
    info!("Tick interval: {:?}", config.tick_interval);
    info!("Max connections: {}", config.max_connections);

    let demo = demo::launch(config.room_settings())?;
    let lobby = demo.lobby.clone();
    let server = GameServer::new(config, move |_: SocketAddr| Some(lobby.clone()));

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
