//! End-to-end replication: payloads in, game state and events out.

use skeld_game::{
    ComponentKind, EventKind, EventTarget, GameEvent, Replica, VoteOutcome,
};
use skeld_protocol::{
    ClientId, NetId, Part, Payload, PlayerId, PlayerRecord, RoomCode, Rpc, Spawn, SpawnType,
    SpawnedComponent, Vector2, Writer,
};

const CODE: RoomCode = RoomCode(0x4443_4241);
const ME: ClientId = ClientId(1);
const OTHER: ClientId = ClientId(2);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn child(id: u32, data: Vec<u8>) -> SpawnedComponent {
    SpawnedComponent {
        net_id: NetId(id),
        data,
    }
}

fn transform(sequence: u16, position: Vector2) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(sequence).vector2(position).vector2(Vector2::ZERO);
    w.into_bytes()
}

fn player_spawn(owner: ClientId, first: u32, player: u8) -> Part {
    Part::Spawn(Spawn {
        spawn_type: SpawnType::Player,
        owner: owner.0 as i32,
        flags: 1,
        components: vec![
            child(first, vec![1, player]),
            child(first + 1, vec![]),
            child(first + 2, transform(0, Vector2::ZERO)),
        ],
    })
}

fn game_data_spawn() -> Part {
    let mut table = Writer::new();
    PlayerRecord::write_list(
        &[PlayerRecord::new(PlayerId(0)), PlayerRecord::new(PlayerId(1))],
        &mut table,
    );
    Part::Spawn(Spawn {
        spawn_type: SpawnType::GameData,
        owner: -2,
        flags: 0,
        components: vec![child(1, table.into_bytes()), child(2, vec![0])],
    })
}

fn meeting_spawn() -> Part {
    Part::Spawn(Spawn {
        spawn_type: SpawnType::MeetingHub,
        owner: -2,
        flags: 0,
        components: vec![child(3, vec![0])],
    })
}

fn rpc(net_id: u32, rpc: Rpc) -> Part {
    Part::Rpc {
        net_id: NetId(net_id),
        rpc,
    }
}

fn data(parts: Vec<Part>) -> Payload {
    Payload::GameData { code: CODE, parts }
}

/// Joined, with a game data table, a meeting, me as player 0 (net ids
/// 10..13) and the other client as player 1 (net ids 20..23).
fn lobby() -> Replica {
    let mut replica = Replica::new();
    replica.apply(&Payload::JoinedGame {
        code: CODE,
        client_id: ME,
        host_id: OTHER,
        others: vec![OTHER],
    });
    replica.apply(&data(vec![
        game_data_spawn(),
        meeting_spawn(),
        player_spawn(ME, 10, 0),
        player_spawn(OTHER, 20, 1),
    ]));
    replica
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

#[test]
fn test_stale_transform_update_is_ignored() {
    let mut replica = lobby();
    let ahead = Vector2::new(-40.0, 40.0);
    replica.apply(&data(vec![Part::Data {
        net_id: NetId(22),
        data: transform(10, ahead),
    }]));

    let effects = replica.apply(&data(vec![Part::Data {
        net_id: NetId(22),
        data: transform(9, Vector2::new(40.0, -40.0)),
    }]));

    assert!(effects.events.is_empty());
    let game = replica.game().unwrap();
    assert_eq!(game.player(PlayerId(1)).unwrap().position, Some(ahead));
}

#[test]
fn test_data_for_unknown_net_id_has_no_effect() {
    let mut replica = lobby();
    let effects = replica.apply(&data(vec![Part::Data {
        net_id: NetId(999),
        data: transform(1, Vector2::ZERO),
    }]));
    assert!(effects.events.is_empty());
}

// ---------------------------------------------------------------------------
// Spawn and despawn
// ---------------------------------------------------------------------------

#[test]
fn test_malformed_spawn_registers_nothing() {
    let mut replica = lobby();
    let mut broken = player_spawn(ClientId(3), 30, 2);
    if let Part::Spawn(spawn) = &mut broken {
        spawn.components[2].data.truncate(3);
    }
    let effects = replica.apply(&data(vec![broken]));

    assert!(effects.events.is_empty());
    let game = replica.game().unwrap();
    for id in 30..33 {
        assert!(game.component(NetId(id)).is_none());
    }
}

#[test]
fn test_despawn_leaves_siblings_live() {
    let mut replica = lobby();
    let effects = replica.apply(&data(vec![Part::Despawn { net_id: NetId(20) }]));
    assert_eq!(
        effects.events,
        vec![GameEvent::component(NetId(20), EventKind::Despawned)]
    );

    let game = replica.game().unwrap();
    assert!(game.component(NetId(20)).is_none());
    assert_eq!(
        game.component(NetId(21)).map(|c| c.kind()),
        Some(ComponentKind::PlayerPhysics)
    );
    assert_eq!(
        game.component(NetId(22)).map(|c| c.kind()),
        Some(ComponentKind::CustomNetworkTransform)
    );
    // Without its control the object no longer resolves to a player.
    assert!(game.player(PlayerId(1)).is_none());
}

#[test]
fn test_respawn_over_live_ids_unlinks_previous_owner() {
    let mut replica = lobby();
    let before = replica.game().unwrap().member(ME).unwrap().player;
    assert!(replica.game().unwrap().member(OTHER).unwrap().player.is_some());

    // My new player object reuses every net id of the other client's.
    replica.apply(&data(vec![player_spawn(ME, 20, 0)]));

    let game = replica.game().unwrap();
    assert_eq!(game.member(OTHER).unwrap().player, None);
    let mine = game.member(ME).unwrap().player;
    assert!(mine.is_some());
    assert_ne!(mine, before);
}

// ---------------------------------------------------------------------------
// RPCs
// ---------------------------------------------------------------------------

#[test]
fn test_murder_with_unknown_victim_changes_nothing() {
    let mut replica = lobby();
    let effects = replica.apply(&data(vec![rpc(
        10,
        Rpc::MurderPlayer {
            victim: NetId(404),
        },
    )]));

    assert!(effects.events.is_empty());
    let game = replica.game().unwrap();
    assert!(game.players().iter().all(|p| !p.dead));
}

#[test]
fn test_murder_emits_three_events() {
    let mut replica = lobby();
    let effects = replica.apply(&data(vec![rpc(
        20,
        Rpc::MurderPlayer { victim: NetId(10) },
    )]));

    let targets: Vec<EventTarget> = effects.events.iter().map(|e| e.target).collect();
    assert_eq!(
        targets,
        vec![
            EventTarget::Game,
            EventTarget::Player(PlayerId(0)),
            EventTarget::Player(PlayerId(1)),
        ]
    );
    assert!(replica.game().unwrap().me().unwrap().dead);
}

#[test]
fn test_older_start_counter_is_not_applied() {
    let mut replica = lobby();
    replica.apply(&data(vec![rpc(
        20,
        Rpc::SetStartCounter {
            sequence: 7,
            seconds: 3,
        },
    )]));
    let effects = replica.apply(&data(vec![rpc(
        20,
        Rpc::SetStartCounter {
            sequence: 5,
            seconds: 5,
        },
    )]));

    assert!(effects.events.is_empty());
    let counter = replica.game().unwrap().start_counter().unwrap();
    assert_eq!((counter.sequence, counter.seconds), (7, 3));
}

#[test]
fn test_start_counter_accepts_wrapped_sequence() {
    let mut replica = lobby();
    replica.apply(&data(vec![rpc(
        20,
        Rpc::SetStartCounter {
            sequence: u32::MAX,
            seconds: 2,
        },
    )]));
    let effects = replica.apply(&data(vec![rpc(
        20,
        Rpc::SetStartCounter {
            sequence: 0,
            seconds: 1,
        },
    )]));
    assert_eq!(
        effects.events,
        vec![GameEvent::game(EventKind::StartCounter { seconds: 1 })]
    );
}

#[test]
fn test_voting_complete_outcomes() {
    let cases = [
        (true, Some(PlayerId(1)), VoteOutcome::Tie),
        (false, None, VoteOutcome::Skipped),
        (false, Some(PlayerId(1)), VoteOutcome::Exiled(PlayerId(1))),
    ];
    for (tie, exiled, expected) in cases {
        let mut replica = lobby();
        let effects = replica.apply(&data(vec![rpc(
            3,
            Rpc::VotingComplete {
                states: vec![0x40, 0x40],
                exiled,
                tie,
            },
        )]));
        assert_eq!(
            effects.events,
            vec![GameEvent::game(EventKind::VotingComplete(expected))]
        );
        let game = replica.game().unwrap();
        assert!(game.meeting().unwrap().has_voted(1));
    }
}

#[test]
fn test_update_game_data_merges_records() {
    let mut replica = lobby();
    let mut record = PlayerRecord::new(PlayerId(1));
    record.name = "blue".into();
    record.set_flag(PlayerRecord::IMPOSTOR, true);
    replica.apply(&data(vec![rpc(
        1,
        Rpc::UpdateGameData {
            players: vec![record],
        },
    )]));

    let game = replica.game().unwrap();
    let table = game.game_data().unwrap();
    assert_eq!(table.players.len(), 2);
    let other = game.player(PlayerId(1)).unwrap();
    assert_eq!(other.name.as_deref(), Some("blue"));
    assert!(other.impostor);
}

#[test]
fn test_chat_is_attributed_to_sender() {
    let mut replica = lobby();
    let effects = replica.apply(&data(vec![rpc(
        20,
        Rpc::SendChat {
            message: "where".into(),
        },
    )]));
    assert_eq!(
        effects.events,
        vec![GameEvent::player(
            PlayerId(1),
            EventKind::Chat {
                message: "where".into()
            }
        )]
    );
}

// ---------------------------------------------------------------------------
// Local mutators
// ---------------------------------------------------------------------------

#[test]
fn test_local_move_round_trips_through_remote_replica() {
    let mut mine = lobby();
    let mut theirs = lobby();

    let position = Vector2::new(-40.0, 40.0);
    let part = mine
        .game_mut()
        .unwrap()
        .local_move(position, Vector2::ZERO)
        .unwrap();
    theirs.apply(&data(vec![part]));

    let seen = theirs.game().unwrap().player(PlayerId(0)).unwrap();
    assert_eq!(seen.position, Some(position));
}

#[test]
fn test_room_scoped_payloads_for_other_rooms_are_dropped() {
    let mut replica = lobby();
    let effects = replica.apply(&Payload::GameData {
        code: RoomCode(12),
        parts: vec![Part::Despawn { net_id: NetId(10) }],
    });
    assert!(effects.events.is_empty());
    assert!(replica.game().unwrap().component(NetId(10)).is_some());
}
