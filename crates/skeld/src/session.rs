//! The client's session state machine.

use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where the client is in its connection lifecycle.
///
/// ```text
///   Idle ──→ Connecting ──→ Connected ──→ Joining ──→ InGame
///                               ↑            │
///                               └─(rejected)─┘
///
///   any state ──→ Disconnected ──(connect)──→ Idle
/// ```
///
/// - **Idle**: no connection has been attempted yet.
/// - **Connecting**: the Hello is in flight.
/// - **Connected**: the server acknowledged the Hello.
/// - **Joining**: a join request is waiting for its answer.
/// - **InGame**: the replica holds a joined game.
/// - **Disconnected**: terminal for this connection. A fresh `connect`
///   starts over from Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Joining,
    InGame,
    Disconnected,
}

impl SessionState {
    /// Returns `true` if the transition from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Idle)
                | (Idle, Connecting)
                | (Connecting, Connected)
                | (Connected, Joining)
                | (Joining, InGame)
                | (Joining, Connected)
        )
    }

    /// Whether a connection is open in this state.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Joining | Self::InGame)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Joining => write!(f, "joining"),
            Self::InGame => write!(f, "in game"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}
