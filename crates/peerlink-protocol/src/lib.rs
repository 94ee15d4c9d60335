//! Wire protocol for PeerLink.
//!
//! This crate defines the vocabulary endpoints and the coordinator speak:
//!
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]): the JSON frames
//!   that travel over the signaling WebSocket, discriminated by `type`.
//! - **Negotiation payloads** ([`SessionDescription`], [`IceCandidate`]):
//!   what endpoints put inside `offer`/`answer`/`ice-candidate`. The
//!   coordinator never parses these; it forwards them verbatim.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (ClientMessage / ServerMessage) → Coordinator / Endpoint
//! ```

mod codec;
mod error;
mod negotiation;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use negotiation::{IceCandidate, SdpKind, SessionDescription};
pub use types::{
    ClientMessage, FailureReason, NegotiationKind, PeerId, PeerSummary,
    ServerMessage, unix_millis,
};
