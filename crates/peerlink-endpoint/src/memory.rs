//! In-process connectivity backend.
//!
//! `MemoryNetwork` pairs offers with answers inside one process. Every
//! endpoint sharing a network (clone it freely) can "connect" to every
//! other: the offer carries the offering node's id, the answer carries
//! the answering node's id, and accepting the answer links the two nodes
//! and opens the channel on both sides.
//!
//! Besides driving tests and local demos, the network exposes fault
//! injection (`fail_link`, `drop_link`, `close_channel`) and inspection
//! (`established`, `applied_candidates`, `offers`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use peerlink_protocol::{IceCandidate, PeerId, SessionDescription};

use crate::connectivity::{
    Connectivity, ConnectivityEvent, ConnectivityFactory, ConnectivityRequest,
    EventSink, LinkState,
};
use crate::ConnectivityError;

/// SDP attribute carrying the node id.
const NODE_ATTRIBUTE: &str = "a=x-memory-node:";

/// Local candidates each node announces after setting its local description.
const CANDIDATES_PER_NODE: u32 = 2;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Node {
    local: PeerId,
    remote: PeerId,
    sink: EventSink,
    /// The node on the other end, once an offer/answer pairs them.
    peer: Option<u64>,
    open: bool,
    closed: bool,
    applied: Vec<IceCandidate>,
    restarts: usize,
}

#[derive(Debug, Default)]
struct NetworkState {
    next_node: u64,
    nodes: HashMap<u64, Node>,
    established: Vec<(PeerId, PeerId)>,
    offers: Vec<(PeerId, PeerId)>,
}

impl NetworkState {
    fn node(&self, id: u64) -> Result<&Node, ConnectivityError> {
        self.nodes.get(&id).ok_or(ConnectivityError::Closed)
    }

    fn node_mut(&mut self, id: u64) -> Result<&mut Node, ConnectivityError> {
        self.nodes.get_mut(&id).ok_or(ConnectivityError::Closed)
    }

    /// The most recent node `local` created towards `remote`.
    fn latest(&self, local: &PeerId, remote: &PeerId) -> Option<u64> {
        self.nodes
            .iter()
            .filter(|(_, node)| &node.local == local && &node.remote == remote)
            .map(|(id, _)| *id)
            .max()
    }

    /// Both ends of the latest live pairing between `a` and `b`.
    fn live_pair(&self, a: &PeerId, b: &PeerId) -> Vec<u64> {
        let Some(near) = self.latest(a, b) else {
            return Vec::new();
        };
        let mut ids = vec![near];
        if let Some(far) = self.nodes.get(&near).and_then(|node| node.peer) {
            ids.push(far);
        }
        ids
    }

    fn announce_candidates(&self, id: u64) {
        if let Some(node) = self.nodes.get(&id) {
            for n in 1..=CANDIDATES_PER_NODE {
                node.sink.emit(ConnectivityEvent::LocalCandidate(IceCandidate {
                    candidate: format!("candidate:m{id}c{n} 1 udp 2122260223 memory {id} typ host"),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                    username_fragment: None,
                }));
            }
        }
    }
}

fn description_node(desc: &SessionDescription) -> Result<u64, ConnectivityError> {
    desc.sdp
        .lines()
        .find_map(|line| line.strip_prefix(NODE_ATTRIBUTE))
        .and_then(|id| id.trim().parse().ok())
        .ok_or_else(|| {
            ConnectivityError::Negotiation("description has no memory node".into())
        })
}

fn description_for(id: u64) -> String {
    format!("v=0\r\no=- {id} 0 IN IP4 127.0.0.1\r\ns=-\r\n{NODE_ATTRIBUTE}{id}\r\n")
}

// ---------------------------------------------------------------------------
// MemoryNetwork
// ---------------------------------------------------------------------------

/// A shared in-process network. Cloning shares the same network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        // A panic while holding the lock cannot leave the maps half
        // updated, so recover the guard instead of propagating poison.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- inspection -------------------------------------------------------

    /// Every channel that opened, as `(offerer, answerer)`, in order.
    pub fn established(&self) -> Vec<(PeerId, PeerId)> {
        self.lock().established.clone()
    }

    /// Every offer created, as `(offerer, target)`, in order.
    pub fn offers(&self) -> Vec<(PeerId, PeerId)> {
        self.lock().offers.clone()
    }

    /// Remote candidates applied to `local`'s latest connectivity
    /// towards `remote`, in application order.
    pub fn applied_candidates(&self, local: &PeerId, remote: &PeerId) -> Vec<IceCandidate> {
        let state = self.lock();
        state
            .latest(local, remote)
            .and_then(|id| state.nodes.get(&id))
            .map(|node| node.applied.clone())
            .unwrap_or_default()
    }

    /// How many times `local`'s latest connectivity towards `remote` was
    /// asked to restart.
    pub fn restarts(&self, local: &PeerId, remote: &PeerId) -> usize {
        let state = self.lock();
        state
            .latest(local, remote)
            .and_then(|id| state.nodes.get(&id))
            .map_or(0, |node| node.restarts)
    }

    // -- fault injection --------------------------------------------------

    /// Fails the link between `a` and `b`: both sides see
    /// `LinkState::Failed` and the channel stops carrying messages.
    pub fn fail_link(&self, a: &PeerId, b: &PeerId) {
        let mut state = self.lock();
        for id in state.live_pair(a, b) {
            if let Some(node) = state.nodes.get_mut(&id) {
                node.open = false;
                node.sink.emit(ConnectivityEvent::Link(LinkState::Failed));
            }
        }
    }

    /// Reports a transient disconnection on both sides. The channel
    /// keeps working.
    pub fn drop_link(&self, a: &PeerId, b: &PeerId) {
        self.emit_pair(a, b, ConnectivityEvent::Link(LinkState::Disconnected));
    }

    /// Reports that a dropped link recovered.
    pub fn restore_link(&self, a: &PeerId, b: &PeerId) {
        self.emit_pair(a, b, ConnectivityEvent::Link(LinkState::Connected));
    }

    /// Closes the data channel on both sides.
    pub fn close_channel(&self, a: &PeerId, b: &PeerId) {
        let mut state = self.lock();
        for id in state.live_pair(a, b) {
            if let Some(node) = state.nodes.get_mut(&id) {
                if node.open {
                    node.open = false;
                    node.sink.emit(ConnectivityEvent::ChannelClosed);
                }
            }
        }
    }

    fn emit_pair(&self, a: &PeerId, b: &PeerId, event: ConnectivityEvent) {
        let state = self.lock();
        for id in state.live_pair(a, b) {
            if let Some(node) = state.nodes.get(&id) {
                node.sink.emit(event.clone());
            }
        }
    }
}

impl ConnectivityFactory for MemoryNetwork {
    type Connectivity = MemoryConnectivity;

    async fn create(
        &self,
        request: ConnectivityRequest,
        events: EventSink,
    ) -> Result<MemoryConnectivity, ConnectivityError> {
        let mut state = self.lock();
        state.next_node += 1;
        let id = state.next_node;
        state.nodes.insert(
            id,
            Node {
                local: request.local,
                remote: request.remote,
                sink: events,
                peer: None,
                open: false,
                closed: false,
                applied: Vec::new(),
                restarts: 0,
            },
        );
        Ok(MemoryConnectivity {
            id,
            network: self.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryConnectivity
// ---------------------------------------------------------------------------

/// One node of a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryConnectivity {
    id: u64,
    network: MemoryNetwork,
}

impl MemoryConnectivity {
    /// This node's id inside its network.
    pub fn node_id(&self) -> u64 {
        self.id
    }
}

impl Connectivity for MemoryConnectivity {
    async fn create_offer(&self) -> Result<SessionDescription, ConnectivityError> {
        let mut state = self.network.lock();
        let node = state.node(self.id)?;
        if node.closed {
            return Err(ConnectivityError::Closed);
        }
        let pair = (node.local.clone(), node.remote.clone());
        state.offers.push(pair);
        state.announce_candidates(self.id);
        Ok(SessionDescription::offer(description_for(self.id)))
    }

    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, ConnectivityError> {
        let offerer = description_node(&offer)?;
        let mut state = self.network.lock();
        if state.node(offerer)?.closed {
            return Err(ConnectivityError::Negotiation(format!(
                "offering node {offerer} is closed"
            )));
        }
        let node = state.node_mut(self.id)?;
        if node.closed {
            return Err(ConnectivityError::Closed);
        }
        node.peer = Some(offerer);
        state.announce_candidates(self.id);
        Ok(SessionDescription::answer(description_for(self.id)))
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), ConnectivityError> {
        let answerer = description_node(&answer)?;
        let mut state = self.network.lock();

        let far = state.node(answerer)?;
        if far.closed || far.peer != Some(self.id) {
            return Err(ConnectivityError::Negotiation(format!(
                "answer from node {answerer} does not match offer {}",
                self.id
            )));
        }
        let answering_peer = far.local.clone();

        let near = state.node_mut(self.id)?;
        if near.closed {
            return Err(ConnectivityError::Closed);
        }
        near.peer = Some(answerer);
        near.open = true;
        let offering_peer = near.local.clone();

        state.node_mut(answerer)?.open = true;
        state.established.push((offering_peer, answering_peer));

        for id in [self.id, answerer] {
            if let Some(node) = state.nodes.get(&id) {
                node.sink.emit(ConnectivityEvent::Link(LinkState::Connected));
                node.sink.emit(ConnectivityEvent::ChannelOpen);
            }
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), ConnectivityError> {
        let mut state = self.network.lock();
        let node = state.node_mut(self.id)?;
        if node.closed {
            return Err(ConnectivityError::Closed);
        }
        node.applied.push(candidate);
        Ok(())
    }

    async fn restart(&self) -> Result<(), ConnectivityError> {
        let mut state = self.network.lock();
        state.node_mut(self.id)?.restarts += 1;
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<(), ConnectivityError> {
        let state = self.network.lock();
        let node = state.node(self.id)?;
        if !node.open {
            return Err(ConnectivityError::ChannelNotOpen);
        }
        let far = node
            .peer
            .and_then(|id| state.nodes.get(&id))
            .filter(|far| far.open)
            .ok_or(ConnectivityError::ChannelNotOpen)?;
        far.sink
            .emit(ConnectivityEvent::ChannelMessage(text.to_string()));
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.network.lock();
        let Some(node) = state.nodes.get_mut(&self.id) else {
            return;
        };
        let was_open = node.open;
        node.open = false;
        node.closed = true;
        let peer = node.peer;

        if was_open {
            if let Some(far) = peer.and_then(|id| state.nodes.get_mut(&id)) {
                if far.open {
                    far.open = false;
                    far.sink.emit(ConnectivityEvent::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::connectivity::TaggedEvent;

    struct Side {
        conn: MemoryConnectivity,
        rx: mpsc::UnboundedReceiver<TaggedEvent>,
    }

    async fn side(network: &MemoryNetwork, local: &str, remote: &str, initiator: bool) -> Side {
        let (sink, rx) = EventSink::channel(PeerId::from(remote), 1);
        let conn = network
            .create(
                ConnectivityRequest {
                    local: PeerId::from(local),
                    remote: PeerId::from(remote),
                    generation: 1,
                    initiator,
                },
                sink,
            )
            .await
            .unwrap();
        Side { conn, rx }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TaggedEvent>) -> Vec<ConnectivityEvent> {
        let mut events = Vec::new();
        while let Ok(tagged) = rx.try_recv() {
            events.push(tagged.event);
        }
        events
    }

    async fn connected_pair(network: &MemoryNetwork) -> (Side, Side) {
        let mut a = side(network, "a", "b", true).await;
        let mut b = side(network, "b", "a", false).await;
        let offer = a.conn.create_offer().await.unwrap();
        let answer = b.conn.accept_offer(offer).await.unwrap();
        a.conn.accept_answer(answer).await.unwrap();
        drain(&mut a.rx);
        drain(&mut b.rx);
        (a, b)
    }

    #[tokio::test]
    async fn test_offer_answer_opens_both_sides() {
        let network = MemoryNetwork::new();
        let mut a = side(&network, "a", "b", true).await;
        let mut b = side(&network, "b", "a", false).await;

        let offer = a.conn.create_offer().await.unwrap();
        let answer = b.conn.accept_offer(offer).await.unwrap();
        a.conn.accept_answer(answer).await.unwrap();

        let a_events = drain(&mut a.rx);
        assert!(matches!(a_events[0], ConnectivityEvent::LocalCandidate(_)));
        assert!(a_events.contains(&ConnectivityEvent::ChannelOpen));
        assert!(drain(&mut b.rx).contains(&ConnectivityEvent::ChannelOpen));
        assert_eq!(
            network.established(),
            [(PeerId::from("a"), PeerId::from("b"))]
        );
        assert_eq!(network.offers(), [(PeerId::from("a"), PeerId::from("b"))]);
    }

    #[tokio::test]
    async fn test_send_delivers_to_far_side() {
        let network = MemoryNetwork::new();
        let (a, mut b) = connected_pair(&network).await;

        a.conn.send("hello").await.unwrap();
        assert_eq!(
            drain(&mut b.rx),
            [ConnectivityEvent::ChannelMessage("hello".into())]
        );
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let network = MemoryNetwork::new();
        let a = side(&network, "a", "b", true).await;
        assert!(matches!(
            a.conn.send("x").await,
            Err(ConnectivityError::ChannelNotOpen)
        ));
    }

    #[tokio::test]
    async fn test_answer_for_closed_offer_is_rejected() {
        let network = MemoryNetwork::new();
        let a = side(&network, "a", "b", true).await;
        let b = side(&network, "b", "a", false).await;
        let offer = a.conn.create_offer().await.unwrap();
        a.conn.close().await;

        assert!(matches!(
            b.conn.accept_offer(offer).await,
            Err(ConnectivityError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn test_close_notifies_far_side_once() {
        let network = MemoryNetwork::new();
        let (a, mut b) = connected_pair(&network).await;

        a.conn.close().await;
        a.conn.close().await;

        assert_eq!(drain(&mut b.rx), [ConnectivityEvent::ChannelClosed]);
        assert!(b.conn.send("x").await.is_err());
    }

    #[tokio::test]
    async fn test_candidates_recorded_in_order() {
        let network = MemoryNetwork::new();
        let a = side(&network, "a", "b", true).await;
        for n in 1..=3 {
            a.conn.add_candidate(IceCandidate::new(format!("c{n}"))).await.unwrap();
        }
        let applied: Vec<String> = network
            .applied_candidates(&PeerId::from("a"), &PeerId::from("b"))
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(applied, ["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn test_fail_link_reaches_both_sides_and_stops_channel() {
        let network = MemoryNetwork::new();
        let (mut a, mut b) = connected_pair(&network).await;

        network.fail_link(&PeerId::from("a"), &PeerId::from("b"));

        assert_eq!(drain(&mut a.rx), [ConnectivityEvent::Link(LinkState::Failed)]);
        assert_eq!(drain(&mut b.rx), [ConnectivityEvent::Link(LinkState::Failed)]);
        assert!(a.conn.send("x").await.is_err());
    }

    #[tokio::test]
    async fn test_restart_is_counted() {
        let network = MemoryNetwork::new();
        let a = side(&network, "a", "b", true).await;
        a.conn.restart().await.unwrap();
        assert_eq!(network.restarts(&PeerId::from("a"), &PeerId::from("b")), 1);
    }

    #[test]
    fn test_description_without_node_is_rejected() {
        let err = description_node(&SessionDescription::offer("v=0\r\n")).unwrap_err();
        assert!(matches!(err, ConnectivityError::Negotiation(_)));
    }
}
