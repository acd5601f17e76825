/// The shared node aggregate.
///
/// One [`Node`] per running coordinator. Every component holds an
/// `Arc<Node>`; mutable protocol state sits in [`NodeState`] behind a tokio
/// mutex that is never held across a network call.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::CoordConfig;
use crate::dedup::DedupCache;
use crate::events::Outlets;
use crate::registry::PeerRecord;
use crate::relays::RelayTable;
use crate::schema::Announcement;
use crate::stats::CoordStats;
use crate::transport::{Crypto, DurableLog, Identity, Transport};
use crate::types::{NodeClass, PeerId};

/// How this node describes itself. Only `durable_log_id` changes after startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfRecord {
    pub node_id: PeerId,
    pub dial_addrs: Vec<String>,
    /// Hex public encryption key.
    pub public_key: String,
    pub crypto_addresses: Vec<String>,
    pub durable_log_id: String,
    pub node_class: NodeClass,
    pub circuit_relay: bool,
    pub metadata: serde_json::Value,
    pub circuit_relay_info: Option<serde_json::Value>,
}

impl SelfRecord {
    pub fn new(
        config: &CoordConfig,
        node_id: PeerId,
        dial_addrs: Vec<String>,
        identity: &Identity,
        durable_log_id: String,
    ) -> Self {
        Self {
            node_id,
            dial_addrs,
            public_key: identity.public_key.clone(),
            crypto_addresses: vec![identity.dial_id.clone()],
            durable_log_id,
            node_class: config.node_class,
            circuit_relay: config.circuit_relay,
            metadata: config.metadata.clone(),
            circuit_relay_info: config.circuit_relay_info.clone(),
        }
    }
}

/// Mutable coordination state.
#[derive(Debug)]
pub struct NodeState {
    pub self_record: SelfRecord,
    pub peers: HashMap<PeerId, PeerRecord>,
    pub relays: RelayTable,
    /// Peer ids and dial addresses kept disconnected.
    pub blacklist: HashSet<String>,
    pub dedup: DedupCache,
}

impl NodeState {
    pub fn new(config: &CoordConfig, self_record: SelfRecord) -> Self {
        Self {
            self_record,
            peers: HashMap::new(),
            relays: RelayTable::default(),
            blacklist: config.blacklist.iter().cloned().collect(),
            dedup: DedupCache::new(config.dedup_capacity),
        }
    }
}

pub struct Node {
    pub(crate) id: PeerId,
    pub(crate) config: CoordConfig,
    pub(crate) identity: Identity,
    pub(crate) state: Mutex<NodeState>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) log: Arc<dyn DurableLog>,
    pub(crate) crypto: Arc<dyn Crypto>,
    pub(crate) stats: Arc<CoordStats>,
    pub(crate) outlets: Outlets,
}

impl Node {
    pub fn new(
        config: CoordConfig,
        identity: Identity,
        self_record: SelfRecord,
        transport: Arc<dyn Transport>,
        log: Arc<dyn DurableLog>,
        crypto: Arc<dyn Crypto>,
        outlets: Outlets,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: self_record.node_id.clone(),
            state: Mutex::new(NodeState::new(&config, self_record)),
            config,
            identity,
            transport,
            log,
            crypto,
            stats: Arc::new(CoordStats::default()),
            outlets,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &CoordConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<CoordStats> {
        &self.stats
    }

    /// Our announcement as of now.
    pub async fn announcement(&self) -> Announcement {
        let state = self.state.lock().await;
        Announcement::from_self(&state.self_record)
    }

    pub async fn self_record(&self) -> SelfRecord {
        self.state.lock().await.self_record.clone()
    }

    /// Record a content hash; `false` if already seen.
    pub(crate) async fn first_sighting(&self, hash: &str) -> bool {
        let fresh = self.state.lock().await.dedup.insert(hash);
        if !fresh {
            self.stats.duplicates_dropped.inc();
        }
        fresh
    }

    /// Refresh the peer/relay gauges.
    pub(crate) fn update_gauges(&self, state: &NodeState) {
        self.stats.peers_known.set(state.peers.len() as u64);
        self.stats.relays_known.set(state.relays.len() as u64);
        self.stats
            .relays_connected
            .set(state.relays.iter().filter(|r| r.connected).count() as u64);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::crypto::SealedBoxCrypto;
    use crate::memory::{MemoryHub, MemoryLog, MemoryTransport};

    /// Node wired to a hub, without any runtime tasks.
    pub async fn node_on(
        hub: &MemoryHub,
        log: &MemoryLog,
        peer_id: &str,
        config: CoordConfig,
    ) -> (Arc<Node>, MemoryTransport) {
        node_with_outlets(hub, log, peer_id, config, Outlets::detached()).await
    }

    pub async fn node_with_outlets(
        hub: &MemoryHub,
        log: &MemoryLog,
        peer_id: &str,
        config: CoordConfig,
        outlets: Outlets,
    ) -> (Arc<Node>, MemoryTransport) {
        use crate::transport::DurableLog as _;
        let transport = hub.transport(peer_id);
        let identity = SealedBoxCrypto::identity_from_seed(seed(peer_id));
        let handle = log.open(peer_id).await.unwrap();
        let dial_addrs = hub.addr_of(peer_id).into_iter().collect();
        let record = SelfRecord::new(&config, peer_id.to_string(), dial_addrs, &identity, handle.id);
        let node = Node::new(
            config,
            identity,
            record,
            Arc::new(transport.clone()),
            Arc::new(log.clone()),
            Arc::new(SealedBoxCrypto::new()),
            outlets,
        );
        (node, transport)
    }

    pub fn seed(peer_id: &str) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        Sha256::digest(peer_id.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::node_on;
    use super::*;
    use crate::memory::{MemoryHub, MemoryLog};

    #[tokio::test]
    async fn self_record_feeds_announcement() {
        let hub = MemoryHub::new();
        let log = MemoryLog::new();
        let config = CoordConfig::default()
            .circuit_relay(true)
            .metadata(serde_json::json!({"app": "demo"}));
        let (node, _) = node_on(&hub, &log, "QmA", config).await;

        let ann = node.announcement().await;
        assert_eq!(ann.node_id, "QmA");
        assert!(ann.is_circuit_relay);
        assert_eq!(ann.metadata["app"], "demo");
        assert_eq!(ann.dial_addrs, vec![hub.addr_of("QmA").unwrap()]);
        assert_eq!(ann.encrypt_pub_key.as_deref(), Some(node.identity.public_key.as_str()));
        assert!(ann.broadcasted_at.is_some());
    }

    #[tokio::test]
    async fn blacklist_seeded_from_config() {
        let hub = MemoryHub::new();
        let log = MemoryLog::new();
        let config = CoordConfig::default().blacklist(vec!["QmBad".into()]);
        let (node, _) = node_on(&hub, &log, "QmA", config).await;
        assert!(node.state.lock().await.blacklist.contains("QmBad"));
    }

    #[tokio::test]
    async fn duplicate_sighting_counted() {
        let hub = MemoryHub::new();
        let log = MemoryLog::new();
        let (node, _) = node_on(&hub, &log, "QmA", CoordConfig::default()).await;
        assert!(node.first_sighting("h").await);
        assert!(!node.first_sighting("h").await);
        assert_eq!(node.stats.duplicates_dropped.get(), 1);
    }
}
