//! Datagram transport abstraction layer for Skeld.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the client core
//! talks to. The core only ever needs three things from the network: open an
//! endpoint towards an address, push a datagram out, and pull the next
//! datagram in. Everything else (binding, addressing, socket lifecycle) lives
//! behind these traits.
//!
//! Two implementations ship with the crate:
//!
//! - [`UdpTransport`]: real UDP via `tokio::net::UdpSocket` (feature `udp`,
//!   on by default)
//! - [`MemoryNetwork`]: in-process datagram pairs with optional simulated
//!   loss, used by tests and demos to script a remote peer

mod error;
mod memory;
#[cfg(feature = "udp")]
mod udp;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryListener, MemoryNetwork, MemoryTransport};
#[cfg(feature = "udp")]
pub use udp::{UdpConnection, UdpTransport};

use std::future::Future;
use std::net::SocketAddr;

/// Largest datagram the transports will hand back from `recv`.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Opens connections towards remote peers.
///
/// The client holds one `Transport` for its whole lifetime and asks it for a
/// fresh [`Connection`] each time it connects (including after a server
/// redirect).
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Opens an endpoint that exchanges datagrams with `addr`.
    fn connect(
        &self,
        addr: SocketAddr,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single peer-to-peer datagram channel.
///
/// Delivery is unreliable: datagrams may be lost, duplicated or reordered.
/// Reliability is layered on top by the caller.
pub trait Connection: Send + Sync + 'static {
    /// Sends one datagram to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next datagram from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is closed. Must be cancel-safe:
    /// the connection actor polls it inside `tokio::select!`.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection. Further `recv` calls return `Ok(None)`.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The address of the remote peer.
    fn peer_addr(&self) -> SocketAddr;
}
