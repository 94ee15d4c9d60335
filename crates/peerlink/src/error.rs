//! Unified error type for PeerLink.

use peerlink_cipher::CipherError;
use peerlink_coordinator::CoordinatorError;
use peerlink_endpoint::{ConnectivityError, EndpointError};
use peerlink_protocol::ProtocolError;
use peerlink_transport::TransportError;

/// Top-level error wrapping every crate-specific error, so `?` works
/// across coordinator and endpoint code alike.
#[derive(Debug, thiserror::Error)]
pub enum PeerlinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// A connectivity backend failed outside of an endpoint, e.g. when
    /// driving a [`WebRtcFactory`](peerlink_webrtc::WebRtcFactory) by hand.
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),
}
