//! Negotiation phases and the transition table.

use std::fmt;

use peerlink_protocol::PeerId;

use crate::InvalidTransition;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Which side yields when both endpoints offer at once.
///
/// Computed independently on both sides from the two ids, so the roles
/// always agree without any extra round trip: the lexicographically
/// smaller id is polite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Abandons its own offer and answers the remote one.
    Polite,
    /// Ignores the remote offer and waits for an answer to its own.
    Impolite,
}

impl Role {
    /// The local side's role towards `remote`.
    pub fn between(local: &PeerId, remote: &PeerId) -> Self {
        if local < remote {
            Self::Polite
        } else {
            Self::Impolite
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polite => write!(f, "polite"),
            Self::Impolite => write!(f, "impolite"),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Where one negotiation stands.
///
/// ```text
///            StartOffer        OfferSent          RemoteAnswer
///   Idle ──────────────▶ Offering ──────▶ AwaitingAnswer ──────▶ Stable
///    │                      ▲                                     ▲  │
///    │ RemoteOffer          │ StartOffer             AnswerSent   │  │ ChannelOpen
///    ▼                      │                                     │  ▼
///  Answering ───────────────┼─────────────────────────────────────┘ Connected
///                           │                                        │
///                     Reconnecting (fresh record)     ChannelClosed /│ LinkLost
///                                                                    ▼
///                                                              Disconnected
///
///   any ── Close ──▶ Closed
/// ```
///
/// A reconnection never moves an old record back to `Offering`: the old
/// record is closed and a fresh one starts in `Reconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Record exists, nothing sent or received yet.
    Idle,
    /// Producing the local offer.
    Offering,
    /// Offer sent, no answer yet.
    AwaitingAnswer,
    /// Accepting a remote offer and producing the answer.
    Answering,
    /// Both descriptions settled; waiting for the channel to open.
    Stable,
    /// The data channel is open.
    Connected,
    /// The channel closed or the link failed; a reconnection is pending.
    Disconnected,
    /// Fresh record created by the reconnection timer.
    Reconnecting,
    /// Torn down. Terminal.
    Closed,
}

/// Something that happened to a negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    StartOffer,
    OfferSent,
    RemoteOffer,
    AnswerSent,
    RemoteAnswer,
    ChannelOpen,
    ChannelClosed,
    LinkLost,
    Close,
}

impl Phase {
    /// The transition table.
    ///
    /// # Errors
    /// `InvalidTransition` for any (phase, input) pair without a row.
    pub fn apply(self, input: Input) -> Result<Phase, InvalidTransition> {
        use Input as I;
        use Phase as P;

        let next = match (self, input) {
            (_, I::Close) => P::Closed,

            (P::Idle | P::Reconnecting, I::StartOffer) => P::Offering,
            (P::Offering, I::OfferSent) => P::AwaitingAnswer,
            (P::AwaitingAnswer, I::RemoteAnswer) => P::Stable,

            (P::Idle | P::Reconnecting, I::RemoteOffer) => P::Answering,
            (P::Answering, I::AnswerSent) => P::Stable,

            (P::Stable, I::ChannelOpen) => P::Connected,
            (P::Stable | P::Connected, I::ChannelClosed) => P::Disconnected,
            (P::Stable | P::Connected | P::Disconnected, I::LinkLost) => P::Disconnected,

            (from, input) => return Err(InvalidTransition { from, input }),
        };
        Ok(next)
    }

    /// `true` while our own offer is outstanding, the window in which an
    /// inbound offer is glare.
    pub fn is_offering(self) -> bool {
        matches!(self, Self::Offering | Self::AwaitingAnswer)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Offering => "Offering",
            Self::AwaitingAnswer => "AwaitingAnswer",
            Self::Answering => "Answering",
            Self::Stable => "Stable",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Reconnecting => "Reconnecting",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_smaller_id_is_polite() {
        let a1 = PeerId::from("a1");
        let b2 = PeerId::from("b2");
        assert_eq!(Role::between(&a1, &b2), Role::Polite);
        assert_eq!(Role::between(&b2, &a1), Role::Impolite);
    }

    #[test]
    fn test_apply_offer_path() {
        let phase = Phase::Idle
            .apply(Input::StartOffer)
            .and_then(|p| p.apply(Input::OfferSent))
            .and_then(|p| p.apply(Input::RemoteAnswer))
            .and_then(|p| p.apply(Input::ChannelOpen))
            .unwrap();
        assert_eq!(phase, Phase::Connected);
    }

    #[test]
    fn test_apply_answer_path() {
        let phase = Phase::Idle
            .apply(Input::RemoteOffer)
            .and_then(|p| p.apply(Input::AnswerSent))
            .unwrap();
        assert_eq!(phase, Phase::Stable);
    }

    #[test]
    fn test_apply_reconnecting_record_can_offer() {
        assert_eq!(Phase::Reconnecting.apply(Input::StartOffer), Ok(Phase::Offering));
    }

    #[test]
    fn test_apply_channel_closed_disconnects() {
        assert_eq!(
            Phase::Connected.apply(Input::ChannelClosed),
            Ok(Phase::Disconnected)
        );
        assert_eq!(Phase::Connected.apply(Input::LinkLost), Ok(Phase::Disconnected));
    }

    #[test]
    fn test_apply_close_from_every_phase() {
        for phase in [
            Phase::Idle,
            Phase::Offering,
            Phase::AwaitingAnswer,
            Phase::Answering,
            Phase::Stable,
            Phase::Connected,
            Phase::Disconnected,
            Phase::Reconnecting,
            Phase::Closed,
        ] {
            assert_eq!(phase.apply(Input::Close), Ok(Phase::Closed));
        }
    }

    #[test]
    fn test_apply_rejects_answer_without_offer() {
        let err = Phase::Idle.apply(Input::RemoteAnswer).unwrap_err();
        assert_eq!(err.from, Phase::Idle);
        assert_eq!(err.input, Input::RemoteAnswer);
        assert!(err.to_string().contains("Idle"));
    }

    #[test]
    fn test_apply_rejects_second_offer_on_settled_record() {
        // A remote restart replaces the record instead of rewinding it.
        assert!(Phase::Connected.apply(Input::RemoteOffer).is_err());
        assert!(Phase::Stable.apply(Input::StartOffer).is_err());
    }

    #[test]
    fn test_closed_is_terminal() {
        assert!(Phase::Closed.apply(Input::StartOffer).is_err());
        assert!(Phase::Closed.apply(Input::ChannelOpen).is_err());
    }

    #[test]
    fn test_is_offering() {
        assert!(Phase::Offering.is_offering());
        assert!(Phase::AwaitingAnswer.is_offering());
        assert!(!Phase::Stable.is_offering());
        assert!(!Phase::Answering.is_offering());
    }
}
