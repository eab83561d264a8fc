use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tuning for the reliability engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// How long to wait for an acknowledgement before resending.
    #[serde(with = "crate::millis")]
    pub ack_interval: Duration,

    /// Give up on a packet after this many resends. `None` keeps resending
    /// until the packet is acknowledged or the connection closes.
    pub max_retransmissions: Option<u32>,

    /// How many recent inbound nonces to remember for duplicate filtering.
    pub duplicate_window: usize,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            ack_interval: Duration::from_millis(1500),
            max_retransmissions: None,
            duplicate_window: 128,
        }
    }
}

impl ReliabilityConfig {
    pub const MIN_ACK_INTERVAL: Duration = Duration::from_millis(10);

    /// Clamps values that would make the engine spin.
    pub fn validated(mut self) -> Self {
        if self.ack_interval < Self::MIN_ACK_INTERVAL {
            warn!(
                ack_interval_ms = self.ack_interval.as_millis() as u64,
                min_ms = Self::MIN_ACK_INTERVAL.as_millis() as u64,
                "ack_interval below minimum, clamping"
            );
            self.ack_interval = Self::MIN_ACK_INTERVAL;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ReliabilityConfig::default();
        assert_eq!(cfg.ack_interval, Duration::from_millis(1500));
        assert_eq!(cfg.max_retransmissions, None);
        assert_eq!(cfg.duplicate_window, 128);
    }

    #[test]
    fn test_validated_clamps_interval() {
        let cfg = ReliabilityConfig {
            ack_interval: Duration::ZERO,
            ..Default::default()
        }
        .validated();
        assert_eq!(cfg.ack_interval, ReliabilityConfig::MIN_ACK_INTERVAL);
    }

    #[test]
    fn test_json_uses_milliseconds_and_defaults() {
        let cfg: ReliabilityConfig =
            serde_json::from_str(r#"{ "ack_interval": 250, "max_retransmissions": 4 }"#)
                .unwrap();
        assert_eq!(cfg.ack_interval, Duration::from_millis(250));
        assert_eq!(cfg.max_retransmissions, Some(4));
        assert_eq!(cfg.duplicate_window, 128);

        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["ack_interval"], 250);
    }
}
