//! Error types for the coordinator.

use peerlink_protocol::ProtocolError;
use peerlink_transport::TransportError;

/// Errors that can end a coordinator task.
///
/// None of these are fatal for the process: a failing connection ends
/// its own handler task and nothing else.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Binding, accepting, reading or writing a socket failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: CoordinatorError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, CoordinatorError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: CoordinatorError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, CoordinatorError::Protocol(_)));
    }
}
