//! In-process datagram network.
//!
//! A [`MemoryNetwork`] is a tiny switchboard: tests register listeners at
//! socket addresses, and a [`MemoryTransport`] handed to the client connects
//! to them. Each connection is a pair of unbounded channels, so datagrams
//! keep their boundaries and arrive in send order unless loss is enabled.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};

use crate::{Connection, Transport, TransportError};

struct NetworkInner {
    listeners: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<MemoryConnection>>>,
    next_port: AtomicU16,
    loss: f64,
}

/// A shared in-memory network. Cheap to clone.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Creates a lossless network.
    pub fn new() -> Self {
        Self::with_loss(0.0)
    }

    /// Creates a network that silently drops each datagram with the given
    /// probability (clamped to `0.0..=1.0`).
    pub fn with_loss(probability: f64) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                listeners: Mutex::new(HashMap::new()),
                next_port: AtomicU16::new(40_000),
                loss: probability.clamp(0.0, 1.0),
            }),
        }
    }

    /// Registers a listener at `addr`, replacing any previous one.
    pub fn listen(&self, addr: SocketAddr) -> MemoryListener {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.insert(addr, tx);
        }
        MemoryListener { addr, rx }
    }

    /// Returns a [`Transport`] that connects through this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts connections made to one address of a [`MemoryNetwork`].
pub struct MemoryListener {
    addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl MemoryListener {
    /// Waits for the next incoming connection. `None` once the network is gone.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.rx.recv().await
    }

    /// The address this listener is registered at.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// The client-side [`Transport`] for a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        addr: SocketAddr,
    ) -> Result<Self::Connection, TransportError> {
        let inner = &self.network.inner;
        let port = inner.next_port.fetch_add(1, Ordering::Relaxed);
        let local: SocketAddr = (Ipv4Addr::LOCALHOST, port).into();

        let (to_server, server_rx) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();

        let client = MemoryConnection::new(addr, to_server, client_rx, inner.loss);
        let server = MemoryConnection::new(local, to_client, server_rx, inner.loss);

        let mut listeners = inner.listeners.lock().map_err(|_| {
            TransportError::ConnectionClosed("memory network poisoned".into())
        })?;
        let delivered = listeners
            .get(&addr)
            .map(|listener| listener.send(server).is_ok())
            .unwrap_or(false);
        if !delivered {
            listeners.remove(&addr);
            return Err(TransportError::Unreachable(addr));
        }

        tracing::debug!(%addr, %local, "memory connection opened");
        Ok(client)
    }
}

/// One end of an in-memory datagram pair.
pub struct MemoryConnection {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    loss: f64,
    closed: AtomicBool,
    close_notify: Notify,
}

impl MemoryConnection {
    fn new(
        peer: SocketAddr,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        loss: f64,
    ) -> Self {
        Self {
            peer,
            tx,
            rx: AsyncMutex::new(rx),
            loss,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    /// Whether [`Connection::close`] has been called on this end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(
                "connection closed locally".into(),
            ));
        }
        if self.loss > 0.0 && rand::rng().random_bool(self.loss) {
            tracing::trace!(peer = %self.peer, len = data.len(), "datagram dropped");
            return Ok(());
        }
        // Like UDP, sending into a vanished peer is not an error.
        if self.tx.send(data.to_vec()).is_err() {
            tracing::trace!(peer = %self.peer, "peer gone, datagram discarded");
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let notified = self.close_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return Ok(None);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            data = rx.recv() => Ok(data),
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
