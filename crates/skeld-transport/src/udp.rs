//! UDP transport implementation using `tokio::net::UdpSocket`.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::{Connection, MAX_DATAGRAM_SIZE, Transport, TransportError};

/// A [`Transport`] that opens one connected UDP socket per connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpTransport;

impl UdpTransport {
    /// Creates a new UDP transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for UdpTransport {
    type Connection = UdpConnection;

    async fn connect(
        &self,
        addr: SocketAddr,
    ) -> Result<Self::Connection, TransportError> {
        let local: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::ConnectFailed { addr, source })?;
        socket
            .connect(addr)
            .await
            .map_err(|source| TransportError::ConnectFailed { addr, source })?;

        tracing::debug!(
            %addr,
            local = ?socket.local_addr().ok(),
            "UDP endpoint opened"
        );

        Ok(UdpConnection {
            peer: addr,
            socket: Arc::new(socket),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        })
    }
}

/// A UDP socket connected to a single peer.
pub struct UdpConnection {
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl Connection for UdpConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(
                "socket closed locally".into(),
            ));
        }
        self.socket
            .send(data)
            .await
            .map(|_| ())
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let notified = self.close_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        tokio::select! {
            result = self.socket.recv(&mut buf) => {
                let n = result.map_err(TransportError::ReceiveFailed)?;
                buf.truncate(n);
                Ok(Some(buf))
            }
            _ = &mut notified => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
        Ok(())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
