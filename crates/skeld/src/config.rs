//! Client configuration.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skeld_protocol::ClientVersion;
use skeld_reliability::{millis, ReliabilityConfig};

use crate::ClientError;

/// Settings for a [`Client`](crate::Client).
///
/// Every field has a default, so a JSON config only needs the fields it
/// changes. Durations are written as whole milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Version sent in the Hello.
    pub client_version: ClientVersion,

    /// Acknowledgement and retransmission tuning.
    pub reliability: ReliabilityConfig,

    /// Send a reliable Ping on this cadence. `None` disables keepalive.
    #[serde(with = "millis::option")]
    pub keepalive_interval: Option<Duration>,

    /// How long `connect` waits for the Hello to be acknowledged.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,

    /// How long `disconnect` waits for the server's Disconnect.
    #[serde(with = "millis")]
    pub disconnect_timeout: Duration,

    /// Redirects followed by a single `join` before giving up.
    pub max_redirects: u32,

    /// Capacity of the event broadcast channel. Subscribers that fall this
    /// far behind skip ahead.
    pub event_capacity: usize,

    /// Capacity of the command channel into the connection task.
    pub command_buffer: usize,

    /// Known master servers by region.
    pub master_servers: BTreeMap<String, Vec<SocketAddr>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_version: ClientVersion::default(),
            reliability: ReliabilityConfig::default(),
            keepalive_interval: Some(Duration::from_millis(1500)),
            connect_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(3),
            max_redirects: 5,
            event_capacity: 256,
            command_buffer: 64,
            master_servers: default_master_servers(),
        }
    }
}

impl ClientConfig {
    /// Parses a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The first master server listed for `region`.
    pub fn master_server(&self, region: &str) -> Option<SocketAddr> {
        self.master_servers
            .get(region)
            .and_then(|addrs| addrs.first().copied())
    }
}

fn default_master_servers() -> BTreeMap<String, Vec<SocketAddr>> {
    let table: [(&str, &[([u8; 4], u16)]); 3] = [
        ("NA", &[([66, 175, 220, 120], 22023), ([45, 79, 5, 6], 22023)]),
        ("EU", &[([172, 105, 251, 170], 22023)]),
        ("AS", &[([139, 162, 111, 196], 22023)]),
    ];
    table
        .into_iter()
        .map(|(region, addrs)| {
            let addrs = addrs
                .iter()
                .map(|&(ip, port)| SocketAddr::from((ip, port)))
                .collect();
            (region.to_owned(), addrs)
        })
        .collect()
}
