//! Reliable delivery on top of an unreliable datagram transport.
//!
//! Hazel marks some packets as reliable: they carry a 16-bit nonce, the
//! receiver answers with an Acknowledge for that nonce, and the sender keeps
//! resending the identical bytes until it sees one. This crate keeps that
//! bookkeeping for one connection in a [`ReliabilityEngine`] that does no IO
//! of its own. The connection actor drives it from a `tokio::select!` loop:
//!
//! ```text
//! loop {
//!     select! {
//!         datagram = conn.recv()              => engine.receive(..) then ack, dedupe, offer to waiters
//!         cmd      = commands.recv()          => engine.prepare(..), send, engine.track(..)
//!         _        = engine.wait_for_retransmit() => resend engine.due(now)
//!     }
//! }
//! ```
//!
//! Timers use `tokio::time`, so tests can run with a paused clock.

mod config;
mod duplicate;
mod engine;
mod error;

pub use config::ReliabilityConfig;
pub use duplicate::DuplicateFilter;
pub use engine::{
    Inbound, Matched, Predicate, ReliabilityEngine, Reply, SendOutcome, Unacknowledged,
    WaitReply,
};
pub use error::ReliabilityError;

/// Serde helpers that store a `Duration` as whole milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// The same for `Option<Duration>`, with `null` for `None`.
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
