//! Integration tests for the UDP transport.
//!
//! A plain `tokio::net::UdpSocket` on loopback plays the server, so these
//! tests exercise real sockets rather than the in-memory network.

#[cfg(feature = "udp")]
mod udp {
    use std::time::Duration;

    use skeld_transport::{Connection, Transport, UdpTransport};
    use tokio::net::UdpSocket;

    /// Binds a server socket on an OS-assigned loopback port.
    async fn server() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("server should bind")
    }

    #[tokio::test]
    async fn test_datagrams_round_trip() {
        let server = server().await;
        let addr = server.local_addr().unwrap();

        let conn = UdpTransport::new().connect(addr).await.expect("should connect");
        assert_eq!(conn.peer_addr(), addr);

        // Client to server. The server learns the client's address from
        // the first datagram, the same way a Hazel server does.
        conn.send(&[0x08, 0x00, 0x01]).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, client) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x08, 0x00, 0x01]);

        // Server to client, boundaries preserved.
        server.send_to(&[0x0a, 0x00, 0x01, 0xff], client).await.unwrap();
        server.send_to(&[0x0c, 0x00, 0x02], client).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), Some(vec![0x0a, 0x00, 0x01, 0xff]));
        assert_eq!(conn.recv().await.unwrap(), Some(vec![0x0c, 0x00, 0x02]));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_recv() {
        let server = server().await;
        let addr = server.local_addr().unwrap();
        let conn = std::sync::Arc::new(UdpTransport::new().connect(addr).await.unwrap());

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.recv().await })
        };
        // Let the reader park on the socket.
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("recv should return after close")
            .unwrap();
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let server = server().await;
        let conn = UdpTransport::new()
            .connect(server.local_addr().unwrap())
            .await
            .unwrap();
        conn.close().await.unwrap();
        assert!(conn.send(&[0x0c, 0x00, 0x01]).await.is_err());
    }
}
