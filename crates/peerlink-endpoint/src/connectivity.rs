//! The seam between the orchestrator and whatever actually moves bytes
//! between two endpoints.
//!
//! The orchestrator never touches sockets or ICE agents. For each
//! negotiation it asks a [`ConnectivityFactory`] for a [`Connectivity`]
//! object and drives it through offer/answer/candidates. Everything the
//! backend observes on its own (local candidates, link state, channel
//! open/close, inbound messages) comes back through an [`EventSink`]
//! stamped with the remote id and the record generation, so events from
//! a torn-down negotiation can be recognized and dropped.
//!
//! Two backends exist: the in-process [`MemoryNetwork`](crate::MemoryNetwork)
//! and the WebRTC backend in the `peerlink-webrtc` crate.

use std::future::Future;

use peerlink_protocol::{IceCandidate, PeerId, SessionDescription};
use tokio::sync::mpsc;

use crate::ConnectivityError;

/// Transport-level state of the path between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Checking,
    Connected,
    /// Temporarily lost; may recover on its own.
    Disconnected,
    /// Lost for good until restarted.
    Failed,
    Closed,
}

/// Something a backend observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// A local candidate to send to the remote side.
    LocalCandidate(IceCandidate),
    Link(LinkState),
    ChannelOpen,
    ChannelClosed,
    /// A text message arrived on the data channel.
    ChannelMessage(String),
}

/// A [`ConnectivityEvent`] with the negotiation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub remote: PeerId,
    pub generation: u64,
    pub event: ConnectivityEvent,
}

/// Where a backend reports events for one negotiation.
///
/// Cheap to clone. Emitting never blocks; events emitted after the
/// orchestrator stopped are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    remote: PeerId,
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub fn new(
        remote: PeerId,
        generation: u64,
        tx: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        Self {
            remote,
            generation,
            tx,
        }
    }

    /// Creates a sink together with the receiver its events land in.
    /// Mostly useful for driving a backend by hand.
    pub fn channel(
        remote: PeerId,
        generation: u64,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(remote, generation, tx), rx)
    }

    /// Reports an event. Returns `false` if nobody is listening anymore.
    pub fn emit(&self, event: ConnectivityEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                remote: self.remote.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What the orchestrator wants a new connectivity object for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityRequest {
    pub local: PeerId,
    pub remote: PeerId,
    pub generation: u64,
    /// `true` on the offering side, which also creates the data channel.
    pub initiator: bool,
}

/// One negotiation's worth of connectivity: in WebRTC terms a peer
/// connection plus its data channel.
///
/// # Trait bounds
///
/// - `Send + Sync` → the orchestrator task may run on any worker thread.
/// - `'static` → the object lives inside the orchestrator's record map.
pub trait Connectivity: Send + Sync + 'static {
    /// Produces and applies the local offer.
    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, ConnectivityError>> + Send;

    /// Applies a remote offer and produces and applies the local answer.
    fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> impl Future<Output = Result<SessionDescription, ConnectivityError>> + Send;

    /// Applies the remote answer to our offer.
    fn accept_answer(
        &self,
        answer: SessionDescription,
    ) -> impl Future<Output = Result<(), ConnectivityError>> + Send;

    /// Applies one remote candidate. Only called after the remote
    /// description was accepted.
    fn add_candidate(
        &self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), ConnectivityError>> + Send;

    /// Asks the backend to re-gather and re-check paths after a failure.
    /// Backends without such a mechanism keep the default no-op.
    fn restart(&self) -> impl Future<Output = Result<(), ConnectivityError>> + Send {
        async { Ok(()) }
    }

    /// Sends a text message over the data channel.
    ///
    /// # Errors
    /// `ConnectivityError::ChannelNotOpen` if the channel is not open.
    fn send(&self, text: &str) -> impl Future<Output = Result<(), ConnectivityError>> + Send;

    /// Closes the channel and releases the backend's resources.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Builds [`Connectivity`] objects.
pub trait ConnectivityFactory: Send + Sync + 'static {
    type Connectivity: Connectivity;

    fn create(
        &self,
        request: ConnectivityRequest,
        events: EventSink,
    ) -> impl Future<Output = Result<Self::Connectivity, ConnectivityError>> + Send;
}
