//! The endpoint's side of the coordinator connection.
//!
//! The orchestrator only sees typed messages going out and coming in.
//! [`SignalingLink::websocket`] wires those to a real WebSocket with one
//! reader task and one writer task; [`SignalingLink::pair`] wires them to
//! plain channels so a test can play the coordinator.

use std::sync::Arc;

use peerlink_protocol::{ClientMessage, Codec, JsonCodec, ServerMessage};
use peerlink_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::EndpointError;

/// Typed channels to and from the coordinator.
///
/// The inbound side ends (`recv` yields `None`) when the coordinator
/// connection is gone.
#[derive(Debug)]
pub struct SignalingLink {
    pub(crate) outbound: mpsc::UnboundedSender<ClientMessage>,
    pub(crate) inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

/// The far end of a [`SignalingLink::pair`].
#[derive(Debug)]
pub struct LinkRemote {
    /// Frames "from the coordinator".
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    /// Frames the endpoint sent.
    pub rx: mpsc::UnboundedReceiver<ClientMessage>,
}

impl SignalingLink {
    /// An in-memory link and the handle that plays the coordinator.
    pub fn pair() -> (Self, LinkRemote) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkRemote {
                tx: in_tx,
                rx: out_rx,
            },
        )
    }

    /// Dials the coordinator at `url` and starts the I/O tasks.
    ///
    /// # Errors
    /// `EndpointError::Link` if the WebSocket handshake fails.
    pub async fn websocket(url: &str) -> Result<Self, EndpointError> {
        let conn = Arc::new(WebSocketConnection::connect(url).await?);
        let (link, remote) = Self::pair();
        let LinkRemote { tx, rx } = remote;

        tokio::spawn(read_loop(Arc::clone(&conn), tx));
        tokio::spawn(write_loop(conn, rx));
        Ok(link)
    }
}

/// Decodes frames into the inbound channel until the socket closes.
/// Dropping `tx` on exit is what tells the orchestrator the link is gone.
async fn read_loop(conn: Arc<WebSocketConnection>, tx: mpsc::UnboundedSender<ServerMessage>) {
    let codec = JsonCodec;
    loop {
        match conn.recv().await {
            Ok(Some(frame)) => match codec.decode::<ServerMessage>(&frame) {
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(conn = %conn.id(), error = %e, "undecodable coordinator frame");
                }
            },
            Ok(None) => {
                tracing::info!(conn = %conn.id(), "coordinator closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(conn = %conn.id(), error = %e, "coordinator connection failed");
                break;
            }
        }
    }
}

/// Encodes outbound messages onto the socket. Closes the socket once
/// every sender is dropped (the orchestrator stopped).
async fn write_loop(conn: Arc<WebSocketConnection>, mut rx: mpsc::UnboundedReceiver<ClientMessage>) {
    let codec = JsonCodec;
    while let Some(msg) = rx.recv().await {
        let frame = match codec.encode(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(kind = msg.kind(), error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = conn.send(&frame).await {
            tracing::warn!(conn = %conn.id(), error = %e, "failed to send to coordinator");
            break;
        }
    }
    let _ = conn.close().await;
}
