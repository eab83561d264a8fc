//! Client events and filtered subscriptions.
//!
//! Every connection publishes to one `tokio::sync::broadcast` channel owned
//! by the [`Client`](crate::Client), so subscriptions survive reconnects and
//! redirects. An [`EventStream`] can narrow the stream to a single entity.

use std::net::SocketAddr;

use skeld_game::{EventTarget, GameEvent};
use skeld_protocol::{DisconnectReason, Packet};
use tokio::sync::broadcast;
use tracing::warn;

/// Something that happened on the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server acknowledged our Hello.
    Connected { addr: SocketAddr },
    /// The connection ended. `reason` is set when the server said why.
    Disconnected {
        reason: Option<DisconnectReason>,
        message: Option<String>,
    },
    /// Every inbound packet, after acknowledgement and duplicate filtering.
    Packet(Packet),
    /// A change to the replicated game.
    Game(GameEvent),
}

/// Which events a stream yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Only game events about this entity.
    Target(EventTarget),
}

impl EventFilter {
    pub fn matches(&self, event: &ClientEvent) -> bool {
        match (self, event) {
            (Self::All, _) => true,
            (Self::Target(target), ClientEvent::Game(game)) => game.target == *target,
            (Self::Target(_), _) => false,
        }
    }
}

/// A subscription to client events.
pub struct EventStream {
    rx: broadcast::Receiver<ClientEvent>,
    filter: EventFilter,
}

impl EventStream {
    pub(crate) fn new(rx: broadcast::Receiver<ClientEvent>, filter: EventFilter) -> Self {
        Self { rx, filter }
    }

    /// The next matching event, or `None` once the client is dropped.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// A matching event that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagging, skipped events");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use skeld_game::EventKind;
    use skeld_protocol::{NetId, PlayerId};

    use super::*;

    fn chat(player: u8) -> ClientEvent {
        ClientEvent::Game(GameEvent::player(
            PlayerId(player),
            EventKind::Chat {
                message: "hi".into(),
            },
        ))
    }

    #[test]
    fn test_filter_by_target() {
        let filter = EventFilter::Target(EventTarget::Player(PlayerId(1)));
        assert!(filter.matches(&chat(1)));
        assert!(!filter.matches(&chat(2)));
        assert!(!filter.matches(&ClientEvent::Packet(Packet::ping())));
        assert!(EventFilter::All.matches(&ClientEvent::Packet(Packet::ping())));
    }

    #[tokio::test]
    async fn test_stream_skips_other_targets() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = EventStream::new(
            rx,
            EventFilter::Target(EventTarget::Component(NetId(4))),
        );
        tx.send(chat(1)).unwrap();
        let wanted = ClientEvent::Game(GameEvent::component(NetId(4), EventKind::Despawned));
        tx.send(wanted.clone()).unwrap();
        assert_eq!(stream.recv().await, Some(wanted));

        drop(tx);
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_catches_up() {
        let (tx, rx) = broadcast::channel(2);
        let mut stream = EventStream::new(rx, EventFilter::All);
        for i in 0..5 {
            tx.send(chat(i)).unwrap();
        }
        // The two newest survive.
        assert_eq!(stream.recv().await, Some(chat(3)));
        assert_eq!(stream.try_recv(), Some(chat(4)));
        assert_eq!(stream.try_recv(), None);
    }
}
