//! # PeerLink WebRTC backend
//!
//! Implements the endpoint's [`ConnectivityFactory`](peerlink_endpoint::ConnectivityFactory)
//! on top of the `webrtc` crate: one `RTCPeerConnection` per negotiation,
//! carrying a single ordered data channel.
//!
//! ```rust,no_run
//! use peerlink_endpoint::Endpoint;
//! use peerlink_webrtc::WebRtcFactory;
//!
//! # async fn run() -> Result<(), peerlink_endpoint::EndpointError> {
//! let endpoint = Endpoint::builder(WebRtcFactory::default())
//!     .local_id("alice")
//!     .build()?;
//! let (handle, events) = endpoint.connect("ws://127.0.0.1:8080").await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;

pub use config::{DEFAULT_CHANNEL_LABEL, DEFAULT_STUN_SERVERS, WebRtcConfig};
pub use connection::{WebRtcConnectivity, WebRtcFactory};
