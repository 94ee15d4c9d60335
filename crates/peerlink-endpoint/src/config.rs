//! Endpoint configuration.

use std::time::Duration;

use peerlink_protocol::PeerId;
use rand::Rng;

/// Settings for one endpoint.
///
/// All timers are fixed delays; there is no backoff.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// The id this endpoint registers under. Self-declared, never
    /// verified by the coordinator.
    pub local_id: PeerId,

    /// Name shown to other peers. `None` lets the coordinator pick
    /// `User_<first 8 chars of id>`.
    pub display_name: Option<String>,

    /// Delay between a failed or closed link and the fresh offer.
    pub reconnect_delay: Duration,

    /// How long a link may sit in `disconnected` before it is treated
    /// as failed.
    pub disconnect_grace: Duration,

    /// How long an offer or answer may go without the channel opening
    /// before the negotiation is restarted.
    pub negotiation_timeout: Duration,

    /// Capacity of the command channel between handles and the actor.
    pub command_buffer: usize,
}

impl EndpointConfig {
    /// Default settings for the given id.
    pub fn new(local_id: impl Into<PeerId>) -> Self {
        Self {
            local_id: local_id.into(),
            ..Self::default()
        }
    }

    /// Returns a copy with every field forced into its usable range.
    ///
    /// - Timers are at least 1 ms.
    /// - `command_buffer` is at least 1.
    pub fn validated(mut self) -> Self {
        let floor = Duration::from_millis(1);
        self.reconnect_delay = self.reconnect_delay.max(floor);
        self.disconnect_grace = self.disconnect_grace.max(floor);
        self.negotiation_timeout = self.negotiation_timeout.max(floor);
        self.command_buffer = self.command_buffer.max(1);
        self
    }
}

impl Default for EndpointConfig {
    /// Uses a random id. Endpoints that need a stable identity across
    /// restarts should persist one and pass it to [`EndpointConfig::new`].
    fn default() -> Self {
        Self {
            local_id: generate_peer_id(),
            display_name: None,
            reconnect_delay: Duration::from_secs(5),
            disconnect_grace: Duration::from_secs(5),
            negotiation_timeout: Duration::from_secs(30),
            command_buffer: 64,
        }
    }
}

/// Generates a random 32-character hex id (128 bits).
pub fn generate_peer_id() -> PeerId {
    let bytes: [u8; 16] = rand::rng().random();
    PeerId::new(bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}
