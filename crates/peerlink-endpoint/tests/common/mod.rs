//! Shared helpers for the endpoint integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerlink_cipher::Cipher;
use peerlink_coordinator::Coordinator;
use peerlink_endpoint::{
    ConnectivityFactory, ConnectivityRequest, Endpoint, EventSink, LinkRemote,
    MemoryConnectivity, MemoryNetwork, PeerEvent, PeerEvents, SignalingLink,
};
use peerlink_protocol::{
    ClientMessage, FailureReason, NegotiationKind, PeerId, PeerSummary,
    ServerMessage, unix_millis,
};
use tokio::sync::mpsc;

/// Key shared by every test endpoint. Skips Argon2 to keep tests fast.
pub fn test_cipher() -> Cipher {
    Cipher::from_key(&[7; 32])
}

/// An endpoint on `network` registering as `id` with display name
/// `id.to_uppercase()`.
pub fn endpoint(network: &MemoryNetwork, id: &str) -> Endpoint<MemoryNetwork> {
    Endpoint::builder(network.clone())
        .local_id(id)
        .display_name(id.to_uppercase())
        .cipher(test_cipher())
        .build()
        .expect("endpoint should build")
}

/// Starts a coordinator on a random port and returns its WebSocket URL.
pub async fn start_coordinator() -> String {
    let coordinator = Coordinator::builder()
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("coordinator should bind");
    let addr = coordinator.local_addr().expect("should have local addr");

    tokio::spawn(async move {
        let _ = coordinator.run().await;
    });

    format!("ws://{addr}")
}

/// Waits for the first event matching `pred`, skipping the others.
pub async fn expect_event(
    events: &mut PeerEvents,
    mut pred: impl FnMut(&PeerEvent) -> bool,
) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub async fn expect_connected(events: &mut PeerEvents, id: &str) {
    let id = PeerId::from(id);
    expect_event(events, |e| matches!(e, PeerEvent::Connected { id: got } if *got == id)).await;
}

pub async fn expect_disconnected(events: &mut PeerEvents, id: &str) {
    let id = PeerId::from(id);
    expect_event(events, |e| matches!(e, PeerEvent::Disconnected { id: got } if *got == id)).await;
}

/// On paused time, returns once every other task has gone idle: the
/// clock only advances when nothing else can run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Receives frames from an endpoint until one matches `pick`.
pub async fn next_frame<T>(
    remote: &mut LinkRemote,
    mut pick: impl FnMut(ClientMessage) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = remote.rx.recv().await.expect("endpoint closed the link");
            if let Some(found) = pick(msg) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Plays the coordinator for `remote` until every frame pushed so far
/// was processed. A `peer-info` reply is echoed back as an event, and
/// the inbound channel is FIFO, so once that event shows up everything
/// queued before it has been handled.
pub async fn sync(remote: &LinkRemote, events: &mut PeerEvents) {
    let marker = PeerId::from("__sync__");
    remote
        .tx
        .send(ServerMessage::PeerInfo {
            id: marker.clone(),
            display_name: None,
            online: false,
        })
        .expect("endpoint gone");
    expect_event(events, |e| matches!(e, PeerEvent::PeerInfo { id, .. } if *id == marker)).await;
}

// =========================================================================
// Hand-driven remote side
// =========================================================================

/// The far side of a negotiation, driven directly through the
/// connectivity API instead of an orchestrator.
pub struct ManualPeer {
    pub conn: MemoryConnectivity,
    pub events: mpsc::UnboundedReceiver<peerlink_endpoint::TaggedEvent>,
}

impl ManualPeer {
    pub async fn new(network: &MemoryNetwork, local: &str, remote: &str) -> Self {
        let (sink, events) = EventSink::channel(PeerId::from(remote), 1);
        let conn = network
            .create(
                ConnectivityRequest {
                    local: PeerId::from(local),
                    remote: PeerId::from(remote),
                    generation: 1,
                    initiator: false,
                },
                sink,
            )
            .await
            .expect("memory connectivity");
        Self { conn, events }
    }
}

// =========================================================================
// In-process hub
// =========================================================================

/// A minimal in-process coordinator for tests that run on paused time,
/// where real sockets would let the clock jump ahead while I/O is
/// pending.
#[derive(Clone, Default)]
pub struct Hub {
    peers: Arc<Mutex<BTreeMap<PeerId, mpsc::UnboundedSender<ServerMessage>>>>,
}

impl Hub {
    /// A link whose far end is routed by this hub.
    pub fn link(&self) -> SignalingLink {
        let (link, remote) = SignalingLink::pair();
        tokio::spawn(self.clone().route(remote));
        link
    }

    fn deliver(&self, to: &PeerId, msg: ServerMessage) -> bool {
        let peers = self.peers.lock().unwrap();
        peers.get(to).is_some_and(|tx| tx.send(msg).is_ok())
    }

    async fn route(self, remote: LinkRemote) {
        let LinkRemote { tx, mut rx } = remote;
        let mut me: Option<PeerId> = None;

        while let Some(msg) = rx.recv().await {
            match msg {
                ClientMessage::Register { id, display_name } => {
                    let display_name = display_name.unwrap_or_else(|| id.default_display_name());
                    let mut peers = self.peers.lock().unwrap();
                    let list = peers
                        .keys()
                        .filter(|other| **other != id)
                        .map(|other| PeerSummary {
                            id: other.clone(),
                            display_name: other.as_str().to_uppercase(),
                        })
                        .collect();
                    let _ = tx.send(ServerMessage::PeerList { peers: list });
                    for other in peers.values() {
                        let _ = other.send(ServerMessage::PeerJoined {
                            id: id.clone(),
                            display_name: display_name.clone(),
                        });
                    }
                    peers.insert(id.clone(), tx.clone());
                    me = Some(id);
                }
                ClientMessage::Offer { to, payload } => self.forward(&me, NegotiationKind::Offer, to, payload),
                ClientMessage::Answer { to, payload } => self.forward(&me, NegotiationKind::Answer, to, payload),
                ClientMessage::IceCandidate { to, payload } => {
                    self.forward(&me, NegotiationKind::IceCandidate, to, payload)
                }
                ClientMessage::Message { to, content, timestamp } => {
                    let Some(from) = me.clone() else { continue };
                    let relayed = ServerMessage::Message {
                        from,
                        content,
                        timestamp: timestamp.unwrap_or_else(unix_millis),
                    };
                    if !self.deliver(&to, relayed) {
                        let _ = tx.send(ServerMessage::MessageFailed {
                            to,
                            reason: FailureReason::Offline,
                        });
                    }
                }
                _ => {}
            }
        }

        if let Some(id) = me {
            let mut peers = self.peers.lock().unwrap();
            peers.remove(&id);
            for other in peers.values() {
                let _ = other.send(ServerMessage::PeerLeft { id: id.clone() });
            }
        }
    }

    fn forward(&self, me: &Option<PeerId>, kind: NegotiationKind, to: PeerId, payload: serde_json::Value) {
        if let Some(from) = me.clone() {
            self.deliver(&to, ServerMessage::negotiation(kind, from, payload));
        }
    }
}
