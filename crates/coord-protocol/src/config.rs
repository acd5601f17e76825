use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{
    NodeClass, DEFAULT_COORDINATION_TOPIC, DEFAULT_DEDUP_CAPACITY, FRESHNESS_THRESHOLD,
    PROBE_TIMEOUT, RETRY_INTERVAL, RETRY_LIMIT,
};

/// Environment variable overriding [`CoordConfig::relay_list_url`].
pub const ENV_RELAY_LIST_URL: &str = "COORD_RELAY_LIST_URL";

/// Environment variable overriding [`CoordConfig::topic`].
pub const ENV_TOPIC: &str = "COORD_TOPIC";

/// Periods of the maintenance scheduler's tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerIntervals {
    #[serde(with = "millis")]
    pub announce: Duration,
    #[serde(with = "millis")]
    pub refresh_peers: Duration,
    /// measure → sort → dedup → connect.
    #[serde(with = "millis")]
    pub relay_maintenance: Duration,
    #[serde(with = "millis")]
    pub relay_discovery: Duration,
    #[serde(with = "millis")]
    pub access_control: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            announce: Duration::from_secs(22),
            refresh_peers: Duration::from_secs(21),
            relay_maintenance: Duration::from_secs(60),
            relay_discovery: Duration::from_secs(120),
            access_control: Duration::from_secs(30),
        }
    }
}

impl SchedulerIntervals {
    /// Every interval set to `period`. Handy for simulations and tests.
    pub fn uniform(period: Duration) -> Self {
        Self {
            announce: period,
            refresh_peers: period,
            relay_maintenance: period,
            relay_discovery: period,
            access_control: period,
        }
    }
}

/// Configuration for a coordination node.
///
/// Loadable from JSON (every field optional) or built in code:
///
/// ```rust
/// use coord_protocol::{CoordConfig, NodeClass};
///
/// let config = CoordConfig::new()
///     .node_class(NodeClass::Browser)
///     .circuit_relay(false)
///     .dedup_capacity(64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordConfig {
    /// Shared broadcast topic for announcements.
    pub topic: String,
    pub node_class: NodeClass,
    /// Whether this node offers circuit-relay service to others.
    pub circuit_relay: bool,
    /// Application metadata carried verbatim in announcements.
    pub metadata: serde_json::Value,
    pub circuit_relay_info: Option<serde_json::Value>,
    /// Bootstrap relays used when `node_class` is `Browser`.
    pub browser_relays: Vec<String>,
    /// Bootstrap relays used when `node_class` is `Server`.
    pub server_relays: Vec<String>,
    /// Optional HTTPS endpoint serving an extra bootstrap list.
    pub relay_list_url: Option<String>,
    /// Peer ids or dial addresses to keep disconnected.
    pub blacklist: Vec<String>,
    pub dedup_capacity: usize,
    #[serde(with = "millis")]
    pub freshness_threshold: Duration,
    #[serde(with = "millis")]
    pub retry_interval: Duration,
    pub retry_limit: u32,
    #[serde(with = "millis")]
    pub probe_timeout: Duration,
    pub intervals: SchedulerIntervals,
    /// Capacity of the inbound event channel.
    pub inbound_capacity: usize,
}

impl Default for CoordConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_COORDINATION_TOPIC.to_string(),
            node_class: NodeClass::Server,
            circuit_relay: false,
            metadata: serde_json::Value::Object(Default::default()),
            circuit_relay_info: None,
            browser_relays: Vec::new(),
            server_relays: Vec::new(),
            relay_list_url: None,
            blacklist: Vec::new(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            freshness_threshold: FRESHNESS_THRESHOLD,
            retry_interval: RETRY_INTERVAL,
            retry_limit: RETRY_LIMIT,
            probe_timeout: PROBE_TIMEOUT,
            intervals: SchedulerIntervals::default(),
            inbound_capacity: 256,
        }
    }
}

impl CoordConfig {
    /// Defaults plus environment overrides.
    ///
    /// `COORD_TOPIC` replaces the coordination topic and
    /// `COORD_RELAY_LIST_URL` sets the remote relay list endpoint.
    pub fn new() -> Self {
        Self::default().with_env()
    }

    /// Apply `COORD_*` environment overrides on top of `self`.
    pub fn with_env(mut self) -> Self {
        if let Ok(topic) = std::env::var(ENV_TOPIC) {
            if !topic.is_empty() {
                self.topic = topic;
            }
        }
        if let Ok(url) = std::env::var(ENV_RELAY_LIST_URL) {
            if !url.is_empty() {
                self.relay_list_url = Some(url);
            }
        }
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn node_class(mut self, class: NodeClass) -> Self {
        self.node_class = class;
        self
    }

    pub fn circuit_relay(mut self, enabled: bool) -> Self {
        self.circuit_relay = enabled;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn circuit_relay_info(mut self, info: serde_json::Value) -> Self {
        self.circuit_relay_info = Some(info);
        self
    }

    pub fn browser_relays(mut self, addrs: Vec<String>) -> Self {
        self.browser_relays = addrs;
        self
    }

    pub fn server_relays(mut self, addrs: Vec<String>) -> Self {
        self.server_relays = addrs;
        self
    }

    pub fn relay_list_url(mut self, url: impl Into<String>) -> Self {
        self.relay_list_url = Some(url.into());
        self
    }

    pub fn blacklist(mut self, entries: Vec<String>) -> Self {
        self.blacklist = entries;
        self
    }

    /// Set the dedup cache capacity (default: 30).
    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    pub fn freshness_threshold(mut self, threshold: Duration) -> Self {
        self.freshness_threshold = threshold;
        self
    }

    /// Set the retry period and the number of republishes (default: 5 s, 3).
    pub fn retry(mut self, interval: Duration, limit: u32) -> Self {
        self.retry_interval = interval;
        self.retry_limit = limit;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn intervals(mut self, intervals: SchedulerIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    /// Bootstrap relay addresses for this node's class.
    pub fn bootstrap_relays(&self) -> &[String] {
        match self.node_class {
            NodeClass::Browser => &self.browser_relays,
            NodeClass::Server => &self.server_relays,
        }
    }
}

/// `Duration` as integer milliseconds on the wire.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
