//! WebSocket Dispatcher
//!
//! Accepts WebSocket connections and hands each one to the room picked by
//! a [`RoomSelector`]. Rooms run on their own; the server only owns the
//! accept loop, the connection limit and the shutdown signal.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tracing::{error, info, instrument, warn};

use crate::game::handle::RoomHandle;
use crate::game::registry::RoomSettings;
use crate::network::connection::serve_client;
use crate::{EVENT_QUEUE_CAPACITY, MAX_EVENTS_PER_TICK, TICK_INTERVAL};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Room tick interval.
    pub tick_interval: Duration,
    /// Per-connection outbound queue capacity.
    pub outbound_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            tick_interval: TICK_INTERVAL,
            outbound_capacity: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from `TICKROOM_*` environment variables. Missing or unparsable
    /// values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("TICKROOM_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("TICKROOM_MAX_CONNECTIONS", defaults.max_connections),
            tick_interval: std::env::var("TICKROOM_TICK_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            outbound_capacity: env_or("TICKROOM_OUTBOUND_CAPACITY", defaults.outbound_capacity),
            version: defaults.version,
        }
    }

    /// Room settings matching this configuration.
    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            tick_interval: self.tick_interval,
            event_capacity: EVENT_QUEUE_CAPACITY,
            events_per_tick: MAX_EVENTS_PER_TICK,
            outbound_capacity: self.outbound_capacity,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}", key, value);
                default
            }
        },
        Err(_) => default,
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No room would take the connection.
    #[error("No room available for {0}")]
    NoRoom(SocketAddr),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Picks the room a new connection joins first.
pub trait RoomSelector: Send + Sync + 'static {
    /// Entry room for a connection, `None` to turn it away.
    fn select(&self, addr: SocketAddr) -> Option<RoomHandle>;
}

impl<F> RoomSelector for F
where
    F: Fn(SocketAddr) -> Option<RoomHandle> + Send + Sync + 'static,
{
    fn select(&self, addr: SocketAddr) -> Option<RoomHandle> {
        self(addr)
    }
}

/// WebSocket game server.
pub struct GameServer {
    config: ServerConfig,
    selector: Arc<dyn RoomSelector>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, selector: impl RoomSelector) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            selector: Arc::new(selector),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server v{} listening on {}", self.config.version, self.config.bind_addr);
        self.run_on(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn run_on(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(e) = self.handle_connection(stream, addr) {
                                warn!("Rejecting {}: {}", addr, e);
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Hand a new TCP connection to its entry room.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), GameServerError> {
        if self.connections.load(Ordering::Relaxed) >= self.config.max_connections {
            return Err(GameServerError::ConnectionLimitReached);
        }
        let room = self.selector.select(addr).ok_or(GameServerError::NoRoom(addr))?;

        info!("New connection from {} for room {}", addr, room.id());
        let connections = self.connections.clone();
        let outbound_capacity = self.config.outbound_capacity;
        let shutdown_rx = self.shutdown_tx.subscribe();
        connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            match accept_async(stream).await {
                Ok(ws_stream) => {
                    serve_client(ws_stream, addr, room, outbound_capacity, shutdown_rx).await;
                }
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                }
            }
            connections.fetch_sub(1, Ordering::Relaxed);
        });
        Ok(())
    }

    /// Shutdown the server and every open connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
