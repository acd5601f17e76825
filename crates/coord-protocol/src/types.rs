use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport-level peer identity (e.g. a base58 multihash).
pub type PeerId = String;

/// `apiName` carried by every announcement on the coordination topic.
pub const ANNOUNCE_API_NAME: &str = "coord-announce";

/// Announcement schema version.
pub const ANNOUNCE_API_VERSION: &str = "1.0.0";

/// Default coordination topic shared by every node of the network.
pub const DEFAULT_COORDINATION_TOPIC: &str = "peer-coordination-v1";

/// Address segment marking a hop through a circuit relay.
pub const RELAY_HOP_SEGMENT: &str = "/p2p-circuit";

/// Latency assigned to relays that are unmeasured, bootstrap, or unreachable (ms).
pub const SENTINEL_LATENCY_MS: u64 = 10_000;

/// Number of latency samples kept per relay.
pub const LATENCY_RING_CAPACITY: usize = 10;

/// A peer is fresh while its last broadcast is younger than this.
pub const FRESHNESS_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Republish interval for unacknowledged private messages.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Number of republishes before a private message is abandoned.
pub const RETRY_LIMIT: u32 = 3;

/// Upper bound on an about-probe round trip.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(SENTINEL_LATENCY_MS);

/// Default capacity of the inbound dedup cache.
pub const DEFAULT_DEDUP_CAPACITY: usize = 30;

/// Entries read from our own durable log on each replication notification.
pub const DURABLE_TAIL_LEN: usize = 10;

/// Kind of host a node runs on. Selects the bootstrap relay list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    Browser,
    #[serde(alias = "node.js")]
    Server,
}

impl Default for NodeClass {
    fn default() -> Self {
        NodeClass::Server
    }
}

/// Private topic on which a node receives point-to-point traffic.
///
/// Named after the node's own identity.
pub fn private_topic(peer_id: &str) -> String {
    peer_id.to_string()
}

/// Whether a dial address already traverses a relay.
pub fn is_relayed_addr(addr: &str) -> bool {
    addr.contains(RELAY_HOP_SEGMENT)
}

/// Compose an address that reaches `peer_id` through the relay at `relay_addr`.
pub fn relayed_addr(relay_addr: &str, peer_id: &str) -> String {
    format!("{relay_addr}{RELAY_HOP_SEGMENT}/p2p/{peer_id}")
}

/// Extract the peer id from the last `/p2p/<id>` (or legacy `/ipfs/<id>`) segment.
pub fn peer_id_from_addr(addr: &str) -> Option<PeerId> {
    let parts: Vec<&str> = addr.split('/').collect();
    parts
        .windows(2)
        .rev()
        .find(|w| (w[0] == "p2p" || w[0] == "ipfs") && !w[1].is_empty())
        .map(|w| w[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relayed_addr_shape() {
        let addr = relayed_addr("/ip4/1.2.3.4/tcp/4001/p2p/QmRelay", "QmTarget");
        assert_eq!(addr, "/ip4/1.2.3.4/tcp/4001/p2p/QmRelay/p2p-circuit/p2p/QmTarget");
        assert!(is_relayed_addr(&addr));
        assert!(!is_relayed_addr("/ip4/1.2.3.4/tcp/4001/p2p/QmRelay"));
    }

    #[test]
    fn peer_id_is_last_p2p_segment() {
        assert_eq!(
            peer_id_from_addr("/ip4/1.2.3.4/tcp/4001/p2p/QmRelay/p2p-circuit/p2p/QmTarget"),
            Some("QmTarget".to_string())
        );
        assert_eq!(
            peer_id_from_addr("/dns4/relay.example/tcp/443/wss/ipfs/QmLegacy"),
            Some("QmLegacy".to_string())
        );
        assert_eq!(peer_id_from_addr("/ip4/1.2.3.4/tcp/4001"), None);
    }

    #[test]
    fn node_class_accepts_legacy_server_name() {
        let class: NodeClass = serde_json::from_str("\"node.js\"").unwrap();
        assert_eq!(class, NodeClass::Server);
        assert_eq!(serde_json::to_string(&NodeClass::Browser).unwrap(), "\"browser\"");
    }
}
