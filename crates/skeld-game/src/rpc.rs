//! RPC dispatch: applies a remote call to the game and reports what
//! changed.
//!
//! Each handler looks up everything it needs (the calling player, the
//! target player, the component it mutates) before touching any state. If
//! a lookup fails the RPC is dropped whole, which is what happens when a
//! call races a despawn.

use skeld_protocol::{NetId, PlayerId, PlayerRecord, Rpc, TaskState};
use tracing::{debug, trace};

use crate::components::Component;
use crate::events::{EventKind, GameEvent, VoteOutcome};
use crate::game::{Game, StartCounter};

/// Suspect ids at or above this mean the voter skipped.
const SKIPPED_VOTE: u8 = 0xfd;

pub(crate) fn dispatch(game: &mut Game, net_id: NetId, rpc: &Rpc) -> Vec<GameEvent> {
    if !game.registry.contains(net_id) {
        debug!(%net_id, rpc = rpc.id(), "rpc for unknown net id");
        return Vec::new();
    }
    match handle(game, net_id, rpc) {
        Some(events) => events,
        None => {
            debug!(%net_id, rpc = rpc.id(), "rpc target did not resolve, dropping");
            Vec::new()
        }
    }
}

fn handle(game: &mut Game, net_id: NetId, rpc: &Rpc) -> Option<Vec<GameEvent>> {
    match rpc {
        Rpc::CompleteTask { index } => {
            let player = game.player_id_of(net_id)?;
            let record = game.game_data_mut()?.record_mut(player)?;
            let task = record.tasks.get_mut(usize::try_from(*index).ok()?)?;
            task.completed = true;
            Some(vec![GameEvent::player(
                player,
                EventKind::TaskCompleted { index: *index },
            )])
        }

        Rpc::SetInfected { impostors } => {
            if let Some(table) = game.game_data_mut() {
                for id in impostors {
                    if let Some(record) = table.record_mut(*id) {
                        record.set_flag(PlayerRecord::IMPOSTOR, true);
                    }
                }
            }
            game.impostors = impostors.clone();
            Some(vec![GameEvent::game(EventKind::ImpostorsSet {
                impostors: impostors.clone(),
            })])
        }

        Rpc::Exiled => {
            let player = game.player_id_of(net_id)?;
            game.game_data_mut()?
                .entry(player)
                .set_flag(PlayerRecord::DEAD, true);
            Some(vec![GameEvent::player(player, EventKind::Exiled)])
        }

        // Only the host answers these.
        Rpc::CheckName { .. } | Rpc::CheckColor { .. } => Some(Vec::new()),

        Rpc::SetName { name } => update_record(game, net_id, |r| {
            r.name = name.clone();
            EventKind::NameChanged { name: name.clone() }
        }),
        Rpc::SetColor { color } => update_record(game, net_id, |r| {
            r.color = *color;
            EventKind::ColorChanged { color: *color }
        }),
        Rpc::SetHat { hat } => update_record(game, net_id, |r| {
            r.hat = *hat;
            EventKind::HatChanged { hat: *hat }
        }),
        Rpc::SetSkin { skin } => update_record(game, net_id, |r| {
            r.skin = *skin;
            EventKind::SkinChanged { skin: *skin }
        }),
        Rpc::SetPet { pet } => update_record(game, net_id, |r| {
            r.pet = *pet;
            EventKind::PetChanged { pet: *pet }
        }),

        Rpc::ReportDeadBody { target } => {
            let player = game.player_id_of(net_id)?;
            Some(vec![GameEvent::player(
                player,
                EventKind::BodyReported { target: *target },
            )])
        }

        Rpc::StartMeeting { target } => {
            let player = game.player_id_of(net_id)?;
            Some(vec![GameEvent::player(
                player,
                EventKind::MeetingStarted { target: *target },
            )])
        }

        Rpc::MurderPlayer { victim } => {
            let murderer = game.player_id_of(net_id)?;
            let victim = game.player_id_of(*victim)?;
            game.game_data_mut()?
                .entry(victim)
                .set_flag(PlayerRecord::DEAD, true);
            Some(vec![
                GameEvent::game(EventKind::Murder { murderer, victim }),
                GameEvent::player(victim, EventKind::Murdered { by: murderer }),
                GameEvent::player(murderer, EventKind::MurderedSomeone { victim }),
            ])
        }

        Rpc::SendChat { message } => {
            let player = game.player_id_of(net_id)?;
            Some(vec![GameEvent::player(
                player,
                EventKind::Chat {
                    message: message.clone(),
                },
            )])
        }

        Rpc::SetStartCounter { sequence, seconds } => {
            let newer = game
                .start_counter
                .is_none_or(|last| (sequence.wrapping_sub(last.sequence) as i32) > 0);
            if !newer {
                trace!(sequence, "stale start counter");
                return Some(Vec::new());
            }
            game.start_counter = Some(StartCounter {
                sequence: *sequence,
                seconds: *seconds,
            });
            Some(vec![GameEvent::game(EventKind::StartCounter {
                seconds: *seconds,
            })])
        }

        Rpc::EnterVent { vent } => {
            let player = game.player_id_of(net_id)?;
            Some(vec![GameEvent::player(
                player,
                EventKind::EnteredVent { vent: *vent },
            )])
        }

        Rpc::ExitVent { vent } => {
            let player = game.player_id_of(net_id)?;
            Some(vec![GameEvent::player(
                player,
                EventKind::ExitedVent { vent: *vent },
            )])
        }

        Rpc::SnapTo { position } => {
            let player = game.player_id_of(net_id)?;
            game.registry
                .get_mut(net_id)
                .and_then(Component::as_transform_mut)?
                .snap(*position);
            Some(vec![GameEvent::player(
                player,
                EventKind::Snapped {
                    position: *position,
                },
            )])
        }

        Rpc::VotingComplete {
            states,
            exiled,
            tie,
        } => {
            let meeting = game
                .registry
                .get_mut(net_id)
                .and_then(Component::as_meeting_hud_mut)?;
            meeting.states = states.clone();
            let outcome = match (*tie, *exiled) {
                (true, _) => VoteOutcome::Tie,
                (false, None) => VoteOutcome::Skipped,
                (false, Some(player)) => VoteOutcome::Exiled(player),
            };
            Some(vec![GameEvent::game(EventKind::VotingComplete(outcome))])
        }

        Rpc::CastVote { voter, suspect } => {
            game.registry.get(net_id)?.as_meeting_hud()?;
            game.player_object(*voter)?;
            let suspect = if suspect.0 >= SKIPPED_VOTE {
                None
            } else {
                game.player_object(*suspect)?;
                Some(*suspect)
            };
            Some(vec![GameEvent::player(
                *voter,
                EventKind::VoteCast { suspect },
            )])
        }

        Rpc::SetTasks { player, tasks } => {
            let record = game
                .registry
                .get_mut(net_id)
                .and_then(Component::as_game_data_mut)?
                .record_mut(*player)?;
            record.tasks = tasks
                .iter()
                .map(|&id| TaskState {
                    id: u32::from(id),
                    completed: false,
                })
                .collect();
            Some(vec![GameEvent::player(
                *player,
                EventKind::TasksSet {
                    tasks: tasks.clone(),
                },
            )])
        }

        Rpc::UpdateGameData { players } => {
            let table = game
                .registry
                .get_mut(net_id)
                .and_then(Component::as_game_data_mut)?;
            table.merge(players.iter().cloned());
            Some(
                players
                    .iter()
                    .map(|r| GameEvent::player(r.player_id, EventKind::RecordUpdated))
                    .collect(),
            )
        }

        Rpc::Unknown { id, .. } => {
            trace!(id, "skipping unknown rpc");
            Some(Vec::new())
        }
    }
}

/// Applies a cosmetic change to the caller's table row, creating the row
/// if the table does not have one yet.
fn update_record(
    game: &mut Game,
    net_id: NetId,
    apply: impl FnOnce(&mut PlayerRecord) -> EventKind,
) -> Option<Vec<GameEvent>> {
    let player: PlayerId = game.player_id_of(net_id)?;
    let kind = apply(game.game_data_mut()?.entry(player));
    Some(vec![GameEvent::player(player, kind)])
}

#[cfg(test)]
mod tests {
    use skeld_protocol::{
        ClientId, Part, RoomCode, Spawn, SpawnType, SpawnedComponent, Vector2, Writer,
    };

    use super::*;

    fn child(id: u32, data: Vec<u8>) -> SpawnedComponent {
        SpawnedComponent {
            net_id: NetId(id),
            data,
        }
    }

    /// A game with a table (net ids 1, 2), a meeting (3), and players
    /// 0 and 1 at net ids 10.. and 20..
    fn game() -> Game {
        let mut game = Game::new(RoomCode(1), ClientId(1), ClientId(1), [ClientId(2)]);
        let mut table = Writer::new();
        PlayerRecord::write_list(
            &[PlayerRecord::new(PlayerId(0)), PlayerRecord::new(PlayerId(1))],
            &mut table,
        );
        game.apply_part(&Part::Spawn(Spawn {
            spawn_type: SpawnType::GameData,
            owner: -2,
            flags: 0,
            components: vec![child(1, table.into_bytes()), child(2, vec![0])],
        }));
        game.apply_part(&Part::Spawn(Spawn {
            spawn_type: SpawnType::MeetingHub,
            owner: -2,
            flags: 0,
            components: vec![child(3, vec![0])],
        }));
        for (owner, first, player) in [(1, 10, 0), (2, 20, 1)] {
            game.apply_part(&Part::Spawn(Spawn {
                spawn_type: SpawnType::Player,
                owner,
                flags: 1,
                components: vec![
                    child(first, vec![1, player]),
                    child(first + 1, vec![]),
                    child(first + 2, vec![0; 10]),
                ],
            }));
        }
        game
    }

    #[test]
    fn test_murder_marks_victim_dead() {
        let mut game = game();
        let events = dispatch(&mut game, NetId(10), &Rpc::MurderPlayer { victim: NetId(20) });
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            GameEvent::game(EventKind::Murder {
                murderer: PlayerId(0),
                victim: PlayerId(1)
            })
        );
        assert!(game.player(PlayerId(1)).unwrap().dead);
        assert!(!game.player(PlayerId(0)).unwrap().dead);
    }

    #[test]
    fn test_cast_vote_skip_and_unknown_suspect() {
        let mut game = game();
        let skip = dispatch(
            &mut game,
            NetId(3),
            &Rpc::CastVote {
                voter: PlayerId(0),
                suspect: PlayerId(0xff),
            },
        );
        assert_eq!(
            skip,
            vec![GameEvent::player(PlayerId(0), EventKind::VoteCast { suspect: None })]
        );

        let missing = dispatch(
            &mut game,
            NetId(3),
            &Rpc::CastVote {
                voter: PlayerId(0),
                suspect: PlayerId(9),
            },
        );
        assert!(missing.is_empty());
    }

    #[test]
    fn test_cast_vote_requires_meeting_handler() {
        let mut game = game();
        let events = dispatch(
            &mut game,
            NetId(10),
            &Rpc::CastVote {
                voter: PlayerId(0),
                suspect: PlayerId(1),
            },
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_set_tasks_then_complete() {
        let mut game = game();
        dispatch(
            &mut game,
            NetId(1),
            &Rpc::SetTasks {
                player: PlayerId(0),
                tasks: vec![4, 7],
            },
        );
        let events = dispatch(&mut game, NetId(10), &Rpc::CompleteTask { index: 1 });
        assert_eq!(
            events,
            vec![GameEvent::player(PlayerId(0), EventKind::TaskCompleted { index: 1 })]
        );
        let tasks = game.player(PlayerId(0)).unwrap().tasks;
        assert_eq!(
            tasks,
            vec![
                TaskState {
                    id: 4,
                    completed: false
                },
                TaskState {
                    id: 7,
                    completed: true
                }
            ]
        );

        // Out of range index is dropped.
        assert!(dispatch(&mut game, NetId(10), &Rpc::CompleteTask { index: 9 }).is_empty());
    }

    #[test]
    fn test_cosmetics_update_record() {
        let mut game = game();
        let events = dispatch(
            &mut game,
            NetId(20),
            &Rpc::SetName {
                name: "lime".into(),
            },
        );
        assert_eq!(
            events,
            vec![GameEvent::player(
                PlayerId(1),
                EventKind::NameChanged {
                    name: "lime".into()
                }
            )]
        );
        dispatch(&mut game, NetId(20), &Rpc::SetColor { color: 11 });
        let view = game.player(PlayerId(1)).unwrap();
        assert_eq!(view.name.as_deref(), Some("lime"));
        assert_eq!(view.color, Some(11));
    }

    #[test]
    fn test_set_infected_marks_impostors() {
        let mut game = game();
        dispatch(
            &mut game,
            NetId(10),
            &Rpc::SetInfected {
                impostors: vec![PlayerId(1)],
            },
        );
        assert!(game.player(PlayerId(1)).unwrap().impostor);
        assert!(!game.player(PlayerId(0)).unwrap().impostor);
        assert_eq!(game.impostor_ids(), &[PlayerId(1)]);
    }

    #[test]
    fn test_snap_moves_transform() {
        let mut game = game();
        let position = Vector2::new(-40.0, 40.0);
        let events = dispatch(&mut game, NetId(22), &Rpc::SnapTo { position });
        assert_eq!(
            events,
            vec![GameEvent::player(PlayerId(1), EventKind::Snapped { position })]
        );
        assert_eq!(game.player(PlayerId(1)).unwrap().position, Some(position));
    }

    #[test]
    fn test_unknown_rpc_is_skipped() {
        let mut game = game();
        let events = dispatch(
            &mut game,
            NetId(10),
            &Rpc::Unknown {
                id: 99,
                data: vec![1, 2, 3],
            },
        );
        assert!(events.is_empty());
    }
}
