//! The peer registry: which peer id is live on which connection.
//!
//! The registry is the coordinator's only state. It answers two
//! questions for every inbound frame:
//! - "who sent this?" (connection → peer id)
//! - "where does this go?" (peer id → outbound queue)
//!
//! # Concurrency note
//!
//! Like the rest of the coordinator's bookkeeping, `PeerRegistry` is a
//! plain struct with `HashMap`s. The server wraps it in one
//! `tokio::sync::Mutex` and holds the lock for a whole dispatch step, so
//! a `register` and the presence broadcast it triggers can never
//! interleave with another connection's frame.
//!
//! ## Lifecycle of an id
//!
//! ```text
//! register(x, conn-1) ──→ [live on conn-1] ──→ unregister(conn-1) ──→ peer-left
//!                               │
//!                 register(x, conn-2)   (last writer wins)
//!                               │
//!                               ▼
//!                        [live on conn-2]      conn-1 is closed,
//!                                              no peer-left, no second peer-joined
//! ```

use std::collections::HashMap;
use std::time::Instant;

use peerlink_protocol::{PeerId, PeerSummary, ServerMessage};
use peerlink_transport::ConnectionId;
use tokio::sync::mpsc;

/// What a connection's writer task can be asked to do.
#[derive(Debug)]
pub enum Outbound {
    /// Encode and send one frame.
    Frame(ServerMessage),
    /// Close the socket and stop writing.
    Close,
}

/// A cheap, clonable reference to one connection's outbound queue.
///
/// Sending never blocks: frames are pushed onto an unbounded queue that
/// the connection's writer task drains. If the writer is gone (socket
/// already closed) the frame is silently discarded.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    conn_id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerHandle {
    pub fn new(conn_id: ConnectionId, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { conn_id, tx }
    }

    /// The connection this handle writes to.
    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Queues a frame. Returns `false` if the writer has already stopped.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.tx.send(Outbound::Frame(msg)).is_ok()
    }

    /// Asks the writer to close the socket after draining queued frames.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// A live registration.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub handle: PeerHandle,
    pub display_name: String,
    pub connected_at: Instant,
}

/// Everything the caller needs to act on after a `register`.
#[derive(Debug)]
pub struct Registration {
    /// The previous live handle for this id, now removed. The caller
    /// must close it.
    pub evicted: Option<PeerHandle>,
    /// A different id this same connection was registered under before,
    /// now released. The caller must broadcast `peer-left` for it.
    pub released: Option<PeerId>,
    /// `true` if no live record for the id existed, i.e. `peer-joined`
    /// should be broadcast.
    pub first: bool,
    /// Every other live peer, sorted by id.
    pub peers: Vec<PeerSummary>,
}

/// Tracks live peers.
///
/// Invariant: at most one live handle per id, and `by_connection` maps
/// exactly the connections whose handle is the live one for some id.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    /// Live records, keyed by peer id.
    peers: HashMap<PeerId, PeerRecord>,

    /// Reverse index so an inbound frame can be attributed to its sender
    /// without scanning every record. Kept in sync with `peers`.
    by_connection: HashMap<ConnectionId, PeerId>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handle` as the live handle for `id` (last writer wins).
    pub fn register(
        &mut self,
        id: PeerId,
        display_name: String,
        handle: PeerHandle,
    ) -> Registration {
        let conn_id = handle.conn_id();

        // Same socket switching to a new id: release the old one.
        let mut released = None;
        if let Some(previous) = self.by_connection.get(&conn_id).cloned() {
            if previous != id {
                self.by_connection.remove(&conn_id);
                self.peers.remove(&previous);
                tracing::info!(%conn_id, old = %previous, new = %id, "connection changed id");
                released = Some(previous);
            }
        }

        let mut evicted = None;
        let first = match self.peers.get(&id) {
            None => true,
            Some(existing) if existing.handle.conn_id() == conn_id => false,
            Some(existing) => {
                let old = existing.handle.clone();
                self.by_connection.remove(&old.conn_id());
                tracing::info!(
                    peer = %id,
                    old_conn = %old.conn_id(),
                    new_conn = %conn_id,
                    "evicting previous connection"
                );
                evicted = Some(old);
                false
            }
        };

        self.by_connection.insert(conn_id, id.clone());
        self.peers.insert(
            id.clone(),
            PeerRecord {
                id: id.clone(),
                handle,
                display_name,
                connected_at: Instant::now(),
            },
        );

        let mut peers: Vec<PeerSummary> = self
            .peers
            .values()
            .filter(|record| record.id != id)
            .map(|record| PeerSummary {
                id: record.id.clone(),
                display_name: record.display_name.clone(),
            })
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));

        Registration {
            evicted,
            released,
            first,
            peers,
        }
    }

    /// Removes the registration owned by `conn_id`, if it is still live.
    ///
    /// Returns the released id, or `None` if the connection never
    /// registered or was already evicted by a newer connection.
    pub fn unregister(&mut self, conn_id: ConnectionId) -> Option<PeerId> {
        let id = self.by_connection.remove(&conn_id)?;
        // `by_connection` only ever points at live handles, but check
        // anyway before removing someone else's record.
        match self.peers.get(&id) {
            Some(record) if record.handle.conn_id() == conn_id => {
                self.peers.remove(&id);
                Some(id)
            }
            _ => None,
        }
    }

    /// The id registered on `conn_id`, if any.
    pub fn peer_id_for(&self, conn_id: ConnectionId) -> Option<&PeerId> {
        self.by_connection.get(&conn_id)
    }

    /// The live record for `id`, if any.
    pub fn get(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    /// Handles of every live peer except `exclude`.
    pub fn handles_except<'a>(
        &'a self,
        exclude: &'a PeerId,
    ) -> impl Iterator<Item = &'a PeerHandle> + 'a {
        self.peers
            .values()
            .filter(move |record| &record.id != exclude)
            .map(|record| &record.handle)
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
