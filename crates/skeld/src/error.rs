//! Unified error type for the Skeld client.

use skeld_game::GameError;
use skeld_protocol::{DisconnectReason, ProtocolError};
use skeld_reliability::{ReliabilityError, Unacknowledged};
use skeld_transport::TransportError;

use crate::SessionState;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` conversions let `?` lift sub-crate errors into this one.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Opening, sending on, or reading from the datagram transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A packet could not be parsed or composed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Nonce space exhausted, or the reliability engine already closed.
    #[error(transparent)]
    Reliability(#[from] ReliabilityError),

    /// The replicated game refused a local action.
    #[error(transparent)]
    Game(#[from] GameError),

    /// The operation is not allowed in the current session state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    /// The server never acknowledged the Hello.
    #[error("handshake failed: {0}")]
    HandshakeFailed(Unacknowledged),

    /// The server refused to let us join.
    #[error("join rejected: {reason}{}", detail(.message))]
    Rejected {
        reason: DisconnectReason,
        message: Option<String>,
    },

    /// No connection is open.
    #[error("not connected")]
    NotConnected,

    /// The client configuration could not be read.
    #[error("invalid client config: {0}")]
    Config(#[from] serde_json::Error),
}

fn detail(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(" ({m})"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: ClientError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err: ClientError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_from_reliability_error() {
        let err: ClientError = ReliabilityError::NonceExhausted.into();
        assert!(matches!(err, ClientError::Reliability(_)));
    }

    #[test]
    fn test_rejected_message() {
        let err = ClientError::Rejected {
            reason: DisconnectReason::GameFull,
            message: Some("try later".into()),
        };
        let text = err.to_string();
        assert!(text.contains("GameFull"));
        assert!(text.contains("try later"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = ClientError::InvalidState {
            state: SessionState::InGame,
            operation: "join",
        };
        assert_eq!(err.to_string(), "cannot join while in game");
    }
}
