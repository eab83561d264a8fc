//! Error types for the protocol layer.
//!
//! A `ProtocolError` always means the bytes (or the packet being composed)
//! were wrong. It never carries a networking failure.

use crate::Bound;

/// Errors that can occur while reading, writing, parsing or composing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A read ran past the end of the buffer.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A packed integer used more bytes than its width allows.
    #[error("packed integer overflows 32 bits")]
    PackedOverflow,

    /// A length-prefixed string was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// The first byte of a datagram is not a known operation.
    ///
    /// Packets carry no outer length, so there is nothing to skip to.
    #[error("unknown packet operation 0x{0:02x}")]
    UnknownPacket(u8),

    /// A direction-specific variant was composed for the other direction.
    #[error("{what} cannot be sent {bound}")]
    WrongDirection { what: &'static str, bound: Bound },

    /// Text that is neither a four- nor six-letter room code.
    #[error("invalid room code {0:?}")]
    InvalidRoomCode(String),

    /// A structurally valid message that breaks a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
