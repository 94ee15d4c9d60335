//! What the orchestrator reports to the application.

use peerlink_protocol::{FailureReason, PeerId};
use tokio::sync::mpsc;

/// Which path a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    /// The direct data channel.
    Direct,
    /// The coordinator's relay.
    Relay,
}

/// How an inbound payload was protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// A valid envelope that decrypted under our key.
    Encrypted,
    /// Not an envelope at all.
    Plaintext,
    /// An envelope that did not decrypt. The content is the raw frame.
    Undecryptable,
}

/// Notifications for the application, delivered through [`PeerEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer is registered with the coordinator. Fired for every entry
    /// of the initial peer list and for every later `peer-joined`.
    Discovered { id: PeerId, display_name: String },

    /// The direct channel to `id` opened.
    Connected { id: PeerId },

    /// The direct channel to `id` was lost. Reconnection may follow.
    Disconnected { id: PeerId },

    /// `id` left the coordinator. No reconnection is attempted.
    Left { id: PeerId },

    MessageReceived {
        from: PeerId,
        content: String,
        via: Via,
        security: Security,
    },

    PublicPost {
        from: PeerId,
        content: String,
        timestamp: u64,
        security: Security,
    },

    /// A relayed message could not be delivered.
    DeliveryFailed { to: PeerId, reason: FailureReason },

    /// Reply to [`EndpointHandle::request_peer_info`](crate::EndpointHandle::request_peer_info).
    PeerInfo {
        id: PeerId,
        display_name: Option<String>,
        online: bool,
    },

    /// The coordinator reported an error.
    SignalingError { message: String },

    /// The coordinator link dropped. The endpoint has stopped; this is
    /// the last event.
    CoordinatorLost,
}

/// Outcome of [`EndpointHandle::send`](crate::EndpointHandle::send).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Handed to the open data channel.
    Direct,
    /// Handed to the coordinator relay. Delivery is not confirmed;
    /// failures arrive later as [`PeerEvent::DeliveryFailed`].
    Relayed,
}

impl SendResult {
    pub fn is_direct(self) -> bool {
        self == Self::Direct
    }
}

/// `true` for direct delivery, `false` for relay.
impl From<SendResult> for bool {
    fn from(result: SendResult) -> bool {
        result.is_direct()
    }
}

/// The stream of [`PeerEvent`]s for one endpoint.
///
/// Ends (`recv` returns `None`) once the endpoint has stopped and every
/// queued event was read.
#[derive(Debug)]
pub struct PeerEvents {
    rx: mpsc::UnboundedReceiver<PeerEvent>,
}

impl PeerEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<PeerEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.rx.recv().await
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.rx.try_recv().ok()
    }
}
