//! The client's replica of the joined game.
//!
//! [`Replica::apply`] is fed every inbound payload in arrival order. It
//! creates the [`Game`] on JoinedGame, keeps membership current, routes
//! GameData parts into the registry and RPC dispatcher, and hands back the
//! events produced plus any payloads the client owes the server in reply.
//!
//! Payloads scoped to a room other than the joined one are dropped.

use skeld_protocol::{ClientId, Part, Payload, RoomCode};
use tracing::{debug, info};

use crate::events::{EventKind, GameEvent};
use crate::game::Game;

/// What applying one payload produced.
#[derive(Debug, Default, PartialEq)]
pub struct Effects {
    pub events: Vec<GameEvent>,
    /// Payloads to send back to the server.
    pub replies: Vec<Payload>,
}

impl Effects {
    fn events(events: Vec<GameEvent>) -> Self {
        Self {
            events,
            replies: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Replica {
    game: Option<Game>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    pub fn game_mut(&mut self) -> Option<&mut Game> {
        self.game.as_mut()
    }

    pub fn in_game(&self) -> bool {
        self.game.is_some()
    }

    /// Forgets the joined game.
    pub fn reset(&mut self) -> Option<Game> {
        self.game.take()
    }

    pub fn apply(&mut self, payload: &Payload) -> Effects {
        match payload {
            Payload::JoinedGame {
                code,
                client_id,
                host_id,
                others,
            } => {
                info!(%code, client_id = %client_id, host_id = %host_id, "joined game");
                self.game = Some(Game::new(*code, *client_id, *host_id, others.iter().copied()));
                Effects::events(vec![GameEvent::game(EventKind::GameJoined { code: *code })])
            }

            Payload::PlayerJoined {
                code,
                client_id,
                host_id,
            } => {
                let Some(game) = self.scoped(*code) else {
                    return Effects::default();
                };
                let mut events = Vec::new();
                if game.add_member(*client_id) {
                    events.push(GameEvent::member(*client_id, EventKind::MemberJoined));
                }
                if game.set_host(*host_id) {
                    events.push(host_changed(*host_id));
                }
                Effects::events(events)
            }

            Payload::PlayerRemoved {
                code,
                client_id,
                host_id,
                reason,
            } => {
                let Some(game) = self.scoped(*code) else {
                    return Effects::default();
                };
                let mut events = Vec::new();
                if game.remove_member(*client_id).is_some() {
                    events.push(GameEvent::member(
                        *client_id,
                        EventKind::MemberLeft { reason: *reason },
                    ));
                }
                if game.set_host(*host_id) {
                    events.push(host_changed(*host_id));
                }
                Effects::events(events)
            }

            Payload::KickPlayer {
                code,
                client_id,
                banned,
            } => {
                let Some(game) = self.scoped(*code) else {
                    return Effects::default();
                };
                game.remove_member(*client_id);
                Effects::events(vec![GameEvent::member(
                    *client_id,
                    EventKind::Kicked { banned: *banned },
                )])
            }

            Payload::StartGame { code } => {
                let Some(game) = self.scoped(*code) else {
                    return Effects::default();
                };
                info!(%code, "game started");
                game.start();
                Effects {
                    events: vec![GameEvent::game(EventKind::GameStarted)],
                    replies: vec![ready(*code, game.client_id())],
                }
            }

            Payload::EndGame { code, reason, .. } => {
                let Some(game) = self.scoped(*code) else {
                    return Effects::default();
                };
                info!(%code, reason, "game ended");
                game.end(*reason);
                Effects::events(vec![GameEvent::game(EventKind::GameEnded {
                    reason: *reason,
                })])
            }

            Payload::GameData { code, parts } => self.apply_parts(*code, parts),

            Payload::GameDataTo {
                code,
                recipient,
                parts,
            } => {
                let mine = self.game.as_ref().map(Game::client_id);
                if mine.is_some_and(|me| me != *recipient) {
                    debug!(%code, recipient = %recipient, "game data addressed to another client");
                    return Effects::default();
                }
                self.apply_parts(*code, parts)
            }

            _ => Effects::default(),
        }
    }

    fn apply_parts(&mut self, code: RoomCode, parts: &[Part]) -> Effects {
        let Some(game) = self.scoped(code) else {
            return Effects::default();
        };
        let events = parts.iter().flat_map(|part| game.apply_part(part)).collect();
        Effects::events(events)
    }

    fn scoped(&mut self, code: RoomCode) -> Option<&mut Game> {
        match self.game.as_mut() {
            Some(game) if game.code() == code => Some(game),
            Some(game) => {
                debug!(%code, joined = %game.code(), "payload for another room, dropping");
                None
            }
            None => {
                debug!(%code, "game payload while not in a game, dropping");
                None
            }
        }
    }
}

fn host_changed(host_id: ClientId) -> GameEvent {
    GameEvent::game(EventKind::HostChanged { host_id })
}

/// The GameData payload announcing the client is ready.
pub fn ready(code: RoomCode, client_id: ClientId) -> Payload {
    Payload::GameData {
        code,
        parts: vec![Part::Ready { client_id }],
    }
}

/// The GameData payload a client sends after joining: scene change to the
/// online game, then ready.
pub fn announce(code: RoomCode, client_id: ClientId) -> Payload {
    Payload::GameData {
        code,
        parts: vec![
            Part::SceneChange {
                client_id,
                scene: "OnlineGame".to_owned(),
            },
            Part::Ready { client_id },
        ],
    }
}

#[cfg(test)]
mod tests {
    use skeld_protocol::DisconnectReason;

    use super::*;

    fn joined(replica: &mut Replica) {
        replica.apply(&Payload::JoinedGame {
            code: RoomCode(5),
            client_id: ClientId(1),
            host_id: ClientId(2),
            others: vec![ClientId(2)],
        });
    }

    #[test]
    fn test_joined_game_creates_session() {
        let mut replica = Replica::new();
        assert!(!replica.in_game());
        joined(&mut replica);
        let game = replica.game().unwrap();
        assert_eq!(game.code(), RoomCode(5));
        assert_eq!(game.members().count(), 2);
    }

    #[test]
    fn test_start_game_replies_ready() {
        let mut replica = Replica::new();
        joined(&mut replica);
        let effects = replica.apply(&Payload::StartGame { code: RoomCode(5) });
        assert_eq!(effects.replies, vec![ready(RoomCode(5), ClientId(1))]);
        assert!(replica.game().unwrap().started());
    }

    #[test]
    fn test_mismatched_code_is_dropped() {
        let mut replica = Replica::new();
        joined(&mut replica);
        let effects = replica.apply(&Payload::StartGame { code: RoomCode(6) });
        assert_eq!(effects, Effects::default());
        assert!(!replica.game().unwrap().started());
    }

    #[test]
    fn test_player_removed_changes_host() {
        let mut replica = Replica::new();
        joined(&mut replica);
        let effects = replica.apply(&Payload::PlayerRemoved {
            code: RoomCode(5),
            client_id: ClientId(2),
            host_id: ClientId(1),
            reason: DisconnectReason::ExitGame,
        });
        assert_eq!(
            effects.events,
            vec![
                GameEvent::member(
                    ClientId(2),
                    EventKind::MemberLeft {
                        reason: DisconnectReason::ExitGame
                    }
                ),
                GameEvent::game(EventKind::HostChanged {
                    host_id: ClientId(1)
                }),
            ]
        );
        assert!(replica.game().unwrap().is_host());
    }

    #[test]
    fn test_kick_reports_ban_flag() {
        let mut replica = Replica::new();
        joined(&mut replica);
        let effects = replica.apply(&Payload::KickPlayer {
            code: RoomCode(5),
            client_id: ClientId(2),
            banned: true,
        });
        assert_eq!(
            effects.events,
            vec![GameEvent::member(ClientId(2), EventKind::Kicked { banned: true })]
        );
        assert!(replica.game().unwrap().member(ClientId(2)).is_none());
    }

    #[test]
    fn test_game_data_to_other_recipient_is_ignored() {
        let mut replica = Replica::new();
        joined(&mut replica);
        let effects = replica.apply(&Payload::GameDataTo {
            code: RoomCode(5),
            recipient: ClientId(9),
            parts: vec![Part::Ready {
                client_id: ClientId(2),
            }],
        });
        assert!(effects.events.is_empty());
    }

    #[test]
    fn test_end_game_clears_started() {
        let mut replica = Replica::new();
        joined(&mut replica);
        replica.apply(&Payload::StartGame { code: RoomCode(5) });
        replica.apply(&Payload::EndGame {
            code: RoomCode(5),
            reason: 1,
            show_ad: false,
        });
        let game = replica.game().unwrap();
        assert!(!game.started());
        assert_eq!(game.ended(), Some(1));
    }
}
