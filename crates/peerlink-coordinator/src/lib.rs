//! # PeerLink coordinator
//!
//! The signaling service every endpoint connects to. It never carries
//! application traffic between connected peers; it only:
//!
//! - keeps the live [`PeerRegistry`] (one live connection per peer id,
//!   last writer wins),
//! - forwards `offer` / `answer` / `ice-candidate` payloads verbatim,
//! - relays application messages when no direct channel exists, and
//!   reports `message-failed` when the target is offline,
//! - fans out `public-post`s and presence (`peer-joined` / `peer-left`).
//!
//! ```rust,no_run
//! use peerlink_coordinator::Coordinator;
//!
//! # async fn run() -> Result<(), peerlink_coordinator::CoordinatorError> {
//! let coordinator = Coordinator::builder().bind("0.0.0.0:8080").build().await?;
//! println!("listening on {:?}", coordinator.local_addr());
//! coordinator.run().await
//! # }
//! ```

mod error;
mod handler;
mod registry;
mod server;

pub use error::CoordinatorError;
pub use registry::{Outbound, PeerHandle, PeerRecord, PeerRegistry, Registration};
pub use server::{Coordinator, CoordinatorBuilder};
