//! # PeerLink endpoint
//!
//! The client half of PeerLink. An [`Endpoint`] registers with the
//! coordinator, negotiates a direct channel with every peer it learns
//! about, keeps those channels alive, and falls back to the coordinator
//! relay whenever no channel is open.
//!
//! - **Negotiation**: one [`Negotiation`] record per remote id, driven
//!   through the [`Phase`] transition table. Simultaneous offers (glare)
//!   are settled by [`Role`]: the smaller id yields.
//! - **Reconnection**: a failed link or closed channel tears the record
//!   down and offers again after a fixed delay.
//! - **Payloads**: every message is sealed with the deployment
//!   [`Cipher`](peerlink_cipher::Cipher) before it leaves, on either path.
//! - **Backends**: the orchestrator talks to a [`Connectivity`] trait.
//!   [`MemoryNetwork`] connects endpoints inside one process; the
//!   `peerlink-webrtc` crate provides real data channels.
//!
//! ```rust,no_run
//! use peerlink_endpoint::{Endpoint, MemoryNetwork, PeerEvent};
//!
//! # async fn run() -> Result<(), peerlink_endpoint::EndpointError> {
//! let (handle, mut events) = Endpoint::builder(MemoryNetwork::new())
//!     .local_id("alice")
//!     .build()?
//!     .connect("ws://127.0.0.1:8080")
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let PeerEvent::Connected { id } = event {
//!         handle.send(id, "hello").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![allow(async_fn_in_trait)]

mod config;
mod connectivity;
mod error;
mod event;
mod link;
pub mod memory;
mod negotiation;
mod orchestrator;
mod phase;
mod scheduler;

pub use config::{EndpointConfig, generate_peer_id};
pub use connectivity::{
    Connectivity, ConnectivityEvent, ConnectivityFactory, ConnectivityRequest,
    EventSink, LinkState, TaggedEvent,
};
pub use error::{ConnectivityError, EndpointError, InvalidTransition};
pub use event::{PeerEvent, PeerEvents, Security, SendResult, Via};
pub use link::{LinkRemote, SignalingLink};
pub use memory::{MemoryConnectivity, MemoryNetwork};
pub use negotiation::{CandidateQueue, Negotiation, OfferDecision};
pub use orchestrator::{Endpoint, EndpointBuilder, EndpointHandle};
pub use phase::{Input, Phase, Role};
pub use scheduler::TimerReason;
