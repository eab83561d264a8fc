use skeld_protocol::NetId;

/// Errors from the replicated game state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// No game has been joined yet.
    #[error("not in a game")]
    NotInGame,

    /// The local player object has not been spawned yet.
    #[error("local player has not spawned")]
    NoLocalPlayer,

    /// The addressed component is not live.
    #[error("no component with net id {0}")]
    UnknownComponent(NetId),
}
