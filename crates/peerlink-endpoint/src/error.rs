//! Error types for the endpoint layer.

use peerlink_cipher::CipherError;
use peerlink_protocol::ProtocolError;
use peerlink_transport::TransportError;

use crate::phase::{Input, Phase};

/// Errors returned by [`EndpointHandle`](crate::EndpointHandle) and the
/// endpoint builder.
///
/// Sending to an unknown or offline peer is *not* an error: it falls
/// back to the relay and failures arrive later as
/// [`PeerEvent::DeliveryFailed`](crate::PeerEvent::DeliveryFailed).
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// The orchestrator has stopped (explicit `stop()`, or the
    /// coordinator link was lost).
    #[error("endpoint stopped")]
    Stopped,

    /// The coordinator link could not be established.
    #[error(transparent)]
    Link(#[from] TransportError),

    /// A connectivity backend failed.
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    /// A negotiation payload could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The payload key could not be derived.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// A negotiation step arrived in a phase that does not accept it.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Failures reported by a [`Connectivity`](crate::Connectivity) backend.
#[derive(Debug, thiserror::Error)]
pub enum ConnectivityError {
    /// The backend rejected or failed an operation.
    #[error("connectivity backend error: {0}")]
    Backend(String),

    /// A description did not match any negotiation the backend knows.
    #[error("negotiation rejected: {0}")]
    Negotiation(String),

    /// The data channel is not open.
    #[error("data channel is not open")]
    ChannelNotOpen,

    /// The connectivity object was already closed.
    #[error("connectivity closed")]
    Closed,
}

/// A [`Phase`] received an [`Input`] its transition table has no row for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {input:?} in phase {from}")]
pub struct InvalidTransition {
    pub from: Phase,
    pub input: Input,
}
