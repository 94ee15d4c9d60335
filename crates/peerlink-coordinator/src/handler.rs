//! Per-connection handler: registration and message routing.
//!
//! Each accepted connection gets two Tokio tasks:
//!   1. This handler, which reads frames and dispatches them against the
//!      registry.
//!   2. A writer, which drains the connection's outbound queue. Every
//!      other task delivers to this socket only through that queue, so a
//!      slow peer never stalls the dispatcher.
//!
//! The dispatcher holds the registry lock for one whole frame. Outbound
//! deliveries are plain queue pushes, so holding it is cheap.

use std::sync::Arc;

use peerlink_protocol::{
    ClientMessage, Codec, FailureReason, NegotiationKind, PeerId, ServerMessage,
    unix_millis,
};
use peerlink_transport::{Connection, ConnectionId, WebSocketConnection};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::CoordinatorError;
use crate::registry::{Outbound, PeerHandle, PeerRegistry};
use crate::server::CoordinatorState;

/// Drop guard that releases a connection's registration when its
/// handler exits.
///
/// This runs even if the handler panics. Since `Drop` is synchronous, we
/// spawn a fire-and-forget task for the async lock.
struct RegistrationGuard<C: Codec> {
    conn_id: ConnectionId,
    state: Arc<CoordinatorState<C>>,
}

impl<C: Codec> Drop for RegistrationGuard<C> {
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut registry = state.registry.lock().await;
            if let Some(id) = registry.unregister(conn_id) {
                tracing::info!(peer = %id, %conn_id, "peer left");
                broadcast_left(&registry, &id);
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<CoordinatorState<C>>,
) -> Result<(), CoordinatorError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = PeerHandle::new(conn_id, tx);
    tokio::spawn(write_loop(Arc::clone(&conn), Arc::clone(&state), rx));

    let _guard = RegistrationGuard {
        conn_id,
        state: Arc::clone(&state),
    };

    loop {
        let received = match state.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, conn.recv()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::info!(%conn_id, "connection idle, closing");
                    handle.close();
                    break;
                }
            },
            None => conn.recv().await,
        };

        let data = match received {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let msg: ClientMessage = match state.codec.decode(&data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode frame");
                handle.send(ServerMessage::Error {
                    message: e.to_string(),
                });
                continue;
            }
        };

        dispatch(&state, &handle, msg).await;
    }

    // _guard drops here → registration released.
    Ok(())
}

/// Drains the outbound queue onto the socket.
async fn write_loop<C: Codec>(
    conn: Arc<WebSocketConnection>,
    state: Arc<CoordinatorState<C>>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let conn_id = conn.id();
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame(msg) => {
                let bytes = match state.codec.encode(&msg) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(%conn_id, error = %e, "failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(%conn_id, error = %e, "send failed, writer stopping");
                    break;
                }
            }
            Outbound::Close => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(%conn_id, error = %e, "close failed");
                }
                break;
            }
        }
    }
}

/// Applies one client frame to the registry.
async fn dispatch<C: Codec>(
    state: &CoordinatorState<C>,
    handle: &PeerHandle,
    msg: ClientMessage,
) {
    let mut registry = state.registry.lock().await;

    match msg {
        ClientMessage::Register { id, display_name } => {
            register(&mut registry, handle, id, display_name);
        }

        ClientMessage::Offer { to, payload } => {
            if let Some(from) = sender(&registry, handle, "offer") {
                forward(&registry, handle, NegotiationKind::Offer, from, to, payload);
            }
        }

        ClientMessage::Answer { to, payload } => {
            if let Some(from) = sender(&registry, handle, "answer") {
                forward(&registry, handle, NegotiationKind::Answer, from, to, payload);
            }
        }

        ClientMessage::IceCandidate { to, payload } => {
            if let Some(from) = sender(&registry, handle, "ice-candidate") {
                forward(
                    &registry,
                    handle,
                    NegotiationKind::IceCandidate,
                    from,
                    to,
                    payload,
                );
            }
        }

        ClientMessage::Message {
            to,
            content,
            timestamp,
        } => {
            let Some(from) = sender(&registry, handle, "message") else {
                return;
            };
            let timestamp = timestamp.unwrap_or_else(unix_millis);
            let delivered = registry.get(&to).is_some_and(|record| {
                record.handle.send(ServerMessage::Message {
                    from: from.clone(),
                    content,
                    timestamp,
                })
            });
            if delivered {
                tracing::debug!(%from, %to, "relayed message");
            } else {
                tracing::debug!(%from, %to, "relay target offline");
                handle.send(ServerMessage::MessageFailed {
                    to,
                    reason: FailureReason::Offline,
                });
            }
        }

        ClientMessage::PublicPost { content, timestamp } => {
            let Some(from) = sender(&registry, handle, "public-post") else {
                return;
            };
            let timestamp = timestamp.unwrap_or_else(unix_millis);
            let mut fanout = 0usize;
            for peer in registry.handles_except(&from) {
                peer.send(ServerMessage::PublicPost {
                    from: from.clone(),
                    content: content.clone(),
                    timestamp,
                });
                fanout += 1;
            }
            tracing::debug!(%from, fanout, "public post");
        }

        ClientMessage::GetPeerInfo { id } => {
            if sender(&registry, handle, "get-peer-info").is_none() {
                return;
            }
            let reply = match registry.get(&id) {
                Some(record) => ServerMessage::PeerInfo {
                    id,
                    display_name: Some(record.display_name.clone()),
                    online: true,
                },
                None => ServerMessage::PeerInfo {
                    id,
                    display_name: None,
                    online: false,
                },
            };
            handle.send(reply);
        }
    }
}

/// Handles `register`: last writer wins, presence broadcast on first join.
fn register(
    registry: &mut PeerRegistry,
    handle: &PeerHandle,
    id: PeerId,
    display_name: Option<String>,
) {
    if id.is_empty() {
        handle.send(ServerMessage::Error {
            message: "register requires a non-empty id".into(),
        });
        return;
    }

    let display_name = display_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| id.default_display_name());

    let registration = registry.register(id.clone(), display_name.clone(), handle.clone());

    if let Some(old) = registration.evicted {
        old.close();
    }
    if let Some(released) = registration.released {
        broadcast_left(registry, &released);
    }

    handle.send(ServerMessage::PeerList {
        peers: registration.peers,
    });

    if registration.first {
        tracing::info!(peer = %id, conn_id = %handle.conn_id(), "peer joined");
        for peer in registry.handles_except(&id) {
            peer.send(ServerMessage::PeerJoined {
                id: id.clone(),
                display_name: display_name.clone(),
            });
        }
    } else {
        tracing::info!(peer = %id, conn_id = %handle.conn_id(), "peer re-registered");
    }
}

/// Forwards a negotiation payload verbatim, or tells the sender the
/// target is unreachable.
fn forward(
    registry: &PeerRegistry,
    handle: &PeerHandle,
    kind: NegotiationKind,
    from: PeerId,
    to: PeerId,
    payload: Value,
) {
    let delivered = registry.get(&to).is_some_and(|record| {
        record
            .handle
            .send(ServerMessage::negotiation(kind, from.clone(), payload))
    });
    if delivered {
        tracing::debug!(%from, %to, %kind, "forwarded negotiation");
    } else {
        tracing::debug!(%from, %to, %kind, "negotiation target unreachable");
        handle.send(ServerMessage::Error {
            message: format!("peer {to} is not reachable"),
        });
    }
}

/// Resolves the sender's registered id, replying with an error if the
/// connection has not registered yet.
fn sender(registry: &PeerRegistry, handle: &PeerHandle, kind: &str) -> Option<PeerId> {
    let id = registry.peer_id_for(handle.conn_id()).cloned();
    if id.is_none() {
        tracing::debug!(conn_id = %handle.conn_id(), kind, "frame from unregistered connection");
        handle.send(ServerMessage::Error {
            message: format!("register before sending {kind}"),
        });
    }
    id
}

fn broadcast_left(registry: &PeerRegistry, id: &PeerId) {
    for peer in registry.handles_except(id) {
        peer.send(ServerMessage::PeerLeft { id: id.clone() });
    }
}
