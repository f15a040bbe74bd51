//! Client Connection
//!
//! Per-client loop over an accepted WebSocket. Joins a room, pumps every
//! inbound text frame into the room's event queue and follows transfers
//! from room to room over the same socket.
//!
//! The loop never touches room state; it only submits events, consumes its
//! transfer slot and asks rooms to bind or unbind it.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::game::events::Event;
use crate::game::handle::RoomHandle;
use crate::game::room::ClientBinding;

/// How long a closing connection waits for its writer to drain.
const WRITER_GRACE: Duration = Duration::from_millis(100);

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Client closed the socket.
    Closed,
    /// Read failed or a frame did not parse as an event.
    ProtocolError,
    /// The room refused the join or went away.
    Rejected,
    /// Server shutdown.
    Shutdown,
}

/// Serve one client until it disconnects.
pub async fn serve_client<S>(
    ws_stream: WebSocketStream<S>,
    addr: SocketAddr,
    entry: RoomHandle,
    outbound_capacity: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Event>(outbound_capacity);
    let (transfer_tx, mut transfer_rx) = mpsc::channel::<RoomHandle>(1);

    // Outbound writer, ends when every room has dropped this client's queue
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match event.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let mut room = entry;
    let reason = 'rooms: loop {
        let binding = ClientBinding::new(outbound_tx.clone(), transfer_tx.clone());
        let id = match room.join(binding).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Client {} could not join room {}: {}", addr, room.id(), e);
                break 'rooms Disconnect::Rejected;
            }
        };
        info!("Client {} playing entity {} in room {}", addr, id, room.id());

        loop {
            tokio::select! {
                biased;

                target = transfer_rx.recv() => {
                    room.leave(id).await;
                    match target {
                        Some(target) => {
                            debug!("Client {} moving from room {} to room {}", addr, room.id(), target.id());
                            room = target;
                            continue 'rooms;
                        }
                        None => break 'rooms Disconnect::Rejected,
                    }
                }
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match Event::from_json(&text) {
                            Ok(event) => {
                                room.submit(event);
                            }
                            Err(e) => {
                                warn!("Malformed event from {}: {}", addr, e);
                                room.leave(id).await;
                                break 'rooms Disconnect::ProtocolError;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            room.leave(id).await;
                            break 'rooms Disconnect::Closed;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error for {}: {}", addr, e);
                            room.leave(id).await;
                            break 'rooms Disconnect::ProtocolError;
                        }
                        // ping, pong, binary
                        _ => {}
                    }
                }
                _ = shutdown_rx.recv() => {
                    room.leave(id).await;
                    break 'rooms Disconnect::Shutdown;
                }
            }
        }
    };

    // let the writer flush whatever the room sent last
    drop(outbound_tx);
    let _ = tokio::time::timeout(WRITER_GRACE, writer).await;
    info!("Client {} cleaned up ({:?})", addr, reason);
    reason
}
