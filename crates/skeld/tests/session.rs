//! Integration tests for the client against a scripted server.
//!
//! Each test registers one or more listeners on a [`MemoryNetwork`] and
//! drives the server side by hand: decode what the client sent, answer with
//! whatever the scenario needs.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use skeld::prelude::*;
use skeld::protocol::{
    Codec, HazelCodec, Packet, Part, Payload, Rpc, Spawn, SpawnType, SpawnedComponent, Writer,
};
use skeld::reliability::ReliabilityConfig;
use skeld::transport::{MemoryConnection, MemoryListener, MemoryNetwork, MemoryTransport};

// =========================================================================
// Scripted server
// =========================================================================

fn addr(last: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last], 22023))
}

fn addr_v4(last: u8) -> SocketAddrV4 {
    SocketAddrV4::new([10, 0, 0, last].into(), 22023)
}

fn code() -> RoomCode {
    "ABCDEF".parse().unwrap()
}

fn config() -> ClientConfig {
    ClientConfig {
        keepalive_interval: None,
        reliability: ReliabilityConfig {
            ack_interval: Duration::from_millis(100),
            ..Default::default()
        },
        disconnect_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn client(network: &MemoryNetwork, config: ClientConfig) -> Client<MemoryTransport> {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("skeld=debug")
        .try_init();
    Client::new(network.transport(), config)
}

/// The server end of one client connection.
struct Peer {
    conn: MemoryConnection,
    codec: HazelCodec,
    next_nonce: u16,
}

impl Peer {
    async fn accept(listener: &mut MemoryListener) -> Self {
        let conn = listener.accept().await.expect("client should connect");
        Self {
            conn,
            codec: HazelCodec::server(),
            next_nonce: 1,
        }
    }

    async fn raw(&self) -> Vec<u8> {
        self.conn
            .recv()
            .await
            .expect("recv should work")
            .expect("client should still be connected")
    }

    /// The next packet that is not an acknowledgement. Reliable packets
    /// are acknowledged on the way.
    async fn next(&self) -> Packet {
        loop {
            let packet = self.codec.decode(&self.raw().await).expect("client sent garbage");
            if matches!(packet, Packet::Acknowledge { .. }) {
                continue;
            }
            if let Some(nonce) = packet.nonce() {
                self.ack(nonce).await;
            }
            return packet;
        }
    }

    /// The next payload carried by a Reliable or Unreliable packet.
    async fn next_payload(&self) -> Payload {
        loop {
            if let Some(payload) = self.next().await.payloads().first() {
                return payload.clone();
            }
        }
    }

    async fn ack(&self, nonce: u16) {
        self.send_packet(&Packet::acknowledge(nonce)).await;
    }

    async fn send_packet(&self, packet: &Packet) {
        let bytes = self.codec.encode(packet).expect("server packet should encode");
        self.conn.send(&bytes).await.expect("send should work");
    }

    async fn send(&mut self, payload: Payload) -> u16 {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        self.send_packet(&Packet::Reliable {
            nonce,
            payloads: vec![payload],
        })
        .await;
        nonce
    }

    /// Accepts the Hello and returns its nonce and username.
    async fn handshake(&self) -> (u16, String) {
        match self.next().await {
            Packet::Hello {
                nonce, username, ..
            } => (nonce, username),
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    /// Answers the client's Disconnect with our own.
    async fn farewell(&self) {
        loop {
            if let Packet::Disconnect { .. } = self.next().await {
                self.send_packet(&Packet::disconnect()).await;
                return;
            }
        }
    }
}

fn joined(client_id: u32) -> Payload {
    Payload::JoinedGame {
        code: code(),
        client_id: ClientId(client_id),
        host_id: ClientId(3),
        others: vec![ClientId(3)],
    }
}

fn listing() -> GameListing {
    GameListing {
        addr: addr_v4(9),
        code: code(),
        host_name: "host".into(),
        players: 4,
        age: 30,
        map: 0,
        impostors: 1,
        max_players: 10,
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_connect_completes_on_acknowledgement() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());
    let mut events = client.subscribe();

    let server = tokio::spawn(async move {
        let peer = Peer::accept(&mut listener).await;
        let (nonce, username) = peer.handshake().await;
        assert_eq!(nonce, 1);
        assert_eq!(username, "tester");
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    assert_eq!(client.state(), SessionState::Connected);
    assert_eq!(client.peer_addr(), Some(addr(1)));
    // The acknowledgement itself is surfaced as a packet first.
    loop {
        match events.recv().await {
            Some(ClientEvent::Connected { addr: a }) => {
                assert_eq!(a, addr(1));
                break;
            }
            Some(ClientEvent::Packet(_)) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    drop(server.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_hello_is_retransmitted_verbatim() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());

    let server = tokio::spawn(async move {
        let peer = Peer::accept(&mut listener).await;
        let first = peer.raw().await;
        let second = peer.raw().await;
        assert_eq!(first, second);
        peer.ack(1).await;
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    drop(server.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_hello_fails_handshake() {
    let network = MemoryNetwork::new();
    let _listener = network.listen(addr(1));
    let mut cfg = config();
    cfg.reliability.max_retransmissions = Some(2);
    let mut client = client(&network, cfg);

    let err = client.connect(addr(1), "tester").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::HandshakeFailed(Unacknowledged::TimedOut)
    ));
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_connect_to_nobody_fails() {
    let network = MemoryNetwork::new();
    let mut client = client(&network, config());
    let err = client.connect(addr(1), "tester").await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(client.state(), SessionState::Disconnected);
}

// =========================================================================
// Search
// =========================================================================

#[tokio::test]
async fn test_search_returns_listings_and_numbers_sends() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.handshake().await;
        for expected in [2, 3] {
            let packet = peer.next().await;
            assert_eq!(packet.nonce(), Some(expected));
            match packet.payloads() {
                [Payload::GetGameList(query)] => assert_eq!(query.maps, 1),
                other => panic!("expected a game list query, got {other:?}"),
            }
            peer.send(Payload::GameList {
                listings: vec![listing()],
            })
            .await;
        }
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    let query = GameListQuery::new(&[MapId::TheSkeld]);
    for _ in 0..2 {
        let listings = client.search(query).await.unwrap();
        assert_eq!(listings, Some(vec![listing()]));
    }
    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_search_requires_connection() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let err = client.search(GameListQuery::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

// =========================================================================
// Join
// =========================================================================

#[tokio::test]
async fn test_join_follows_redirect() {
    let network = MemoryNetwork::new();
    let mut first = network.listen(addr(1));
    let mut second = network.listen(addr(2));
    let mut client = client(&network, config());

    let redirector = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut first).await;
        peer.handshake().await;
        assert!(matches!(
            peer.next_payload().await,
            Payload::JoinGame { .. }
        ));
        peer.send(Payload::Redirect { addr: addr_v4(2) }).await;
        peer.farewell().await;
    });

    let host = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut second).await;
        let (nonce, username) = peer.handshake().await;
        assert_eq!((nonce, username.as_str()), (1, "tester"));
        match peer.next_payload().await {
            Payload::JoinGame { code: c, .. } => assert_eq!(c, code()),
            other => panic!("expected JoinGame, got {other:?}"),
        }
        peer.send(joined(7)).await;
        // SceneChange and Ready follow the join.
        match peer.next_payload().await {
            Payload::GameData { parts, .. } => assert_eq!(parts.len(), 2),
            other => panic!("expected GameData, got {other:?}"),
        }
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    let game = client
        .join(code(), JoinOptions::default())
        .await
        .unwrap()
        .expect("should join");

    assert_eq!(game.code(), code());
    assert_eq!(game.client_id(), ClientId(7));
    assert_eq!(game.host_id(), ClientId(3));
    assert_eq!(client.state(), SessionState::InGame);
    assert_eq!(client.peer_addr(), Some(addr(2)));

    redirector.await.unwrap();
    drop(host.await.unwrap());
}

#[tokio::test]
async fn test_chat_in_game_is_acknowledged() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.handshake().await;
        peer.next_payload().await;
        peer.send(joined(7)).await;
        peer.next_payload().await;

        let mut transform = Writer::new();
        transform.u16(0).vector2(Vector2::ZERO).vector2(Vector2::ZERO);
        let spawn = Spawn {
            spawn_type: SpawnType::Player,
            owner: 7,
            flags: 1,
            components: vec![
                SpawnedComponent {
                    net_id: NetId(10),
                    data: vec![1, 0],
                },
                SpawnedComponent {
                    net_id: NetId(11),
                    data: vec![],
                },
                SpawnedComponent {
                    net_id: NetId(12),
                    data: transform.into_bytes(),
                },
            ],
        };
        peer.send(Payload::GameData {
            code: code(),
            parts: vec![Part::Spawn(spawn)],
        })
        .await;

        match peer.next_payload().await {
            Payload::GameData { parts, .. } => assert_eq!(
                parts,
                vec![Part::Rpc {
                    net_id: NetId(10),
                    rpc: Rpc::SendChat {
                        message: "hello".into()
                    },
                }]
            ),
            other => panic!("expected chat, got {other:?}"),
        }
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    let mut events = client.subscribe();
    client.join(code(), JoinOptions::default()).await.unwrap();
    loop {
        if let Some(ClientEvent::Game(GameEvent {
            kind: EventKind::Spawned { .. },
            ..
        })) = events.recv().await
        {
            break;
        }
    }

    let me = client.game().await.unwrap().me().unwrap();
    assert_eq!(me.player_id, PlayerId(0));
    let outcome = client.send_chat("hello").await.unwrap();
    assert_eq!(outcome, SendOutcome::Acknowledged);
    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_join_gives_up_after_redirect_limit() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut cfg = config();
    cfg.max_redirects = 0;
    let mut client = client(&network, cfg);

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.handshake().await;
        peer.next_payload().await;
        peer.send(Payload::Redirect { addr: addr_v4(2) }).await;
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    let game = client.join(code(), JoinOptions::default()).await.unwrap();
    assert!(game.is_none());
    assert_eq!(client.state(), SessionState::Connected);
    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_join_rejection_is_reported() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());

    let server = tokio::spawn(async move {
        let mut peer = Peer::accept(&mut listener).await;
        peer.handshake().await;
        peer.next_payload().await;
        peer.send(Payload::JoinError {
            reason: DisconnectReason::GameFull,
            message: None,
        })
        .await;
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    let err = client
        .join(code(), JoinOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Rejected {
            reason: DisconnectReason::GameFull,
            message: None,
        }
    ));
    assert_eq!(client.state(), SessionState::Connected);
    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_join_requires_connection() {
    let network = MemoryNetwork::new();
    let mut client = client(&network, config());
    let err = client
        .join(code(), JoinOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::InvalidState {
            state: SessionState::Idle,
            operation: "join",
        }
    ));
}

#[tokio::test]
async fn test_local_actions_require_game() {
    let network = MemoryNetwork::new();
    let client = client(&network, config());
    let err = client.send_chat("hello").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidState { .. }));
}

// =========================================================================
// Inbound handling
// =========================================================================

/// Connects `client` to a peer that only completes the handshake.
async fn connected(
    client: &mut Client<MemoryTransport>,
    listener: &mut MemoryListener,
) -> Peer {
    let (peer, result) = tokio::join!(
        async {
            let peer = Peer::accept(listener).await;
            peer.handshake().await;
            peer
        },
        client.connect(addr(1), "tester"),
    );
    result.unwrap();
    peer
}

#[tokio::test]
async fn test_duplicate_delivery_is_acked_but_not_reprocessed() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());
    let peer = connected(&mut client, &mut listener).await;
    let mut events = client.subscribe();

    let packet = Packet::Reliable {
        nonce: 40,
        payloads: vec![Payload::GameList {
            listings: vec![listing()],
        }],
    };
    peer.send_packet(&packet).await;
    peer.send_packet(&packet).await;
    for _ in 0..2 {
        let ack = peer.codec.decode(&peer.raw().await).unwrap();
        assert_eq!(ack, Packet::acknowledge(40));
    }
    // An empty list marks the end of the scenario.
    peer.send_packet(&Packet::Unreliable {
        payloads: vec![Payload::GameList { listings: vec![] }],
    })
    .await;

    let mut lists = 0;
    loop {
        let Some(ClientEvent::Packet(packet)) = events.recv().await else {
            continue;
        };
        match packet.payloads() {
            [Payload::GameList { listings }] if listings.is_empty() => break,
            [Payload::GameList { .. }] => lists += 1,
            _ => {}
        }
    }
    assert_eq!(lists, 1);
}

#[tokio::test]
async fn test_server_disconnect_ends_session() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());

    let peer = connected(&mut client, &mut listener).await;
    let mut events = client.subscribe();
    let mut state = client.watch_state();

    peer.send_packet(&Packet::Disconnect {
        reason: Some(DisconnectReason::Kicked),
        message: None,
    })
    .await;

    state
        .wait_for(|s| *s == SessionState::Disconnected)
        .await
        .unwrap();
    loop {
        if let Some(ClientEvent::Disconnected { reason, .. }) = events.recv().await {
            assert_eq!(reason, Some(DisconnectReason::Kicked));
            break;
        }
    }
    assert_eq!(client.peer_addr(), None);
}

// =========================================================================
// Disconnect
// =========================================================================

#[tokio::test]
async fn test_disconnect_waits_for_server_goodbye() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());

    let server = tokio::spawn(async move {
        let peer = Peer::accept(&mut listener).await;
        peer.handshake().await;
        peer.farewell().await;
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Disconnected);
    drop(server.await.unwrap());

    // A second disconnect is a no-op.
    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_gives_up_on_silent_server() {
    let network = MemoryNetwork::new();
    let mut listener = network.listen(addr(1));
    let mut client = client(&network, config());

    let server = tokio::spawn(async move {
        let peer = Peer::accept(&mut listener).await;
        peer.handshake().await;
        peer
    });

    client.connect(addr(1), "tester").await.unwrap();
    let _peer = server.await.unwrap();
    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Disconnected);
}
