//! # PeerLink
//!
//! Peer-to-peer text messaging for small private networks.
//!
//! A [`Coordinator`](prelude::Coordinator) tells endpoints who is online
//! and forwards their WebRTC negotiation messages. Each
//! [`Endpoint`](prelude::Endpoint) negotiates a direct data channel with
//! every other peer it learns about, reconnects when a channel drops, and
//! falls back to relaying through the coordinator while no channel is
//! open. Message content is encrypted end to end with a key derived from
//! a shared passphrase; the coordinator only sees ciphertext.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peerlink::prelude::*;
//!
//! # async fn run() -> Result<(), PeerlinkError> {
//! peerlink::telemetry::init();
//!
//! let coordinator = Coordinator::builder().bind("127.0.0.1:8080").build().await?;
//! tokio::spawn(coordinator.run());
//!
//! let (alice, mut events) = Endpoint::builder(WebRtcFactory::default())
//!     .local_id("alice")
//!     .passphrase("correct horse battery staple")
//!     .build()?
//!     .connect("ws://127.0.0.1:8080")
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let PeerEvent::Connected { id } = event {
//!         alice.send(id, "hello").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod error;
pub mod telemetry;

pub use error::PeerlinkError;

pub use peerlink_cipher as cipher;
pub use peerlink_coordinator as coordinator;
pub use peerlink_endpoint as endpoint;
pub use peerlink_protocol as protocol;
pub use peerlink_transport as transport;
pub use peerlink_webrtc as webrtc;

/// Everything an application needs to run a coordinator or an endpoint.
pub mod prelude {
    pub use crate::PeerlinkError;
    pub use peerlink_cipher::{Cipher, CipherConfig};
    pub use peerlink_coordinator::{Coordinator, CoordinatorBuilder};
    pub use peerlink_endpoint::{
        Endpoint, EndpointBuilder, EndpointConfig, EndpointHandle, MemoryNetwork, PeerEvent,
        PeerEvents, Security, SendResult, Via, generate_peer_id,
    };
    pub use peerlink_protocol::{FailureReason, PeerId, PeerSummary};
    pub use peerlink_webrtc::{WebRtcConfig, WebRtcFactory};
}
