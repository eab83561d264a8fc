use skeld_protocol::ProtocolError;
use skeld_transport::TransportError;

/// Errors that can occur while sending through the reliability engine.
#[derive(Debug, thiserror::Error)]
pub enum ReliabilityError {
    /// Every 16-bit nonce has been handed out on this connection.
    ///
    /// Nonces are never reused, so the connection cannot send another
    /// reliable packet and has to be re-established.
    #[error("reliable nonce space exhausted")]
    NonceExhausted,

    /// The engine was torn down before the packet could be sent.
    #[error("connection closed")]
    Closed,

    /// The packet could not be composed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The datagram could not be handed to the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
