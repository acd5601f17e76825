/// Peer registry: what we know about other coordination nodes.
///
/// Records are created by the first valid announcement and replaced by
/// later ones. They are never deleted; staleness is judged at use time with
/// [`is_fresh_peer`].
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoordError;
use crate::events::CoordEvent;
use crate::node::Node;
use crate::relays::RelayManager;
use crate::schema::{Announcement, InboundAnnouncement};
use crate::transport::{TopicHandler, TopicMessage};
use crate::types::{peer_id_from_addr, private_topic, relayed_addr, PeerId, FRESHNESS_THRESHOLD};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub data: Announcement,
    /// When we received the latest announcement (our clock).
    pub last_seen_at: DateTime<Utc>,
}

/// Whether the peer broadcast within the last 10 minutes.
///
/// A record without `broadcastedAt` is never fresh.
pub fn is_fresh_peer(record: &PeerRecord) -> bool {
    is_fresh_at(record, Utc::now(), FRESHNESS_THRESHOLD)
}

pub fn is_fresh_at(record: &PeerRecord, now: DateTime<Utc>, threshold: Duration) -> bool {
    let Some(broadcasted_at) = record.data.broadcasted_at else {
        return false;
    };
    let age = now.signed_duration_since(broadcasted_at);
    match chrono::Duration::from_std(threshold) {
        Ok(limit) => age < limit,
        Err(_) => true,
    }
}

#[derive(Clone)]
pub struct PeerRegistry {
    node: Arc<Node>,
    relays: RelayManager,
}

impl PeerRegistry {
    pub fn new(node: Arc<Node>, relays: RelayManager) -> Self {
        Self { node, relays }
    }

    /// Store or replace the sender's record.
    ///
    /// Returns `false` only when the announcement is older than the one
    /// already stored for that peer.
    pub async fn add_subnet_peer(&self, announcement: InboundAnnouncement) -> bool {
        let peer_id = announcement.data.node_id.clone();
        let relay_capable = announcement.data.is_circuit_relay;
        let received_at = Utc::now();

        let is_new = {
            let mut state = self.node.state.lock().await;
            let out_of_order = state
                .peers
                .get(&peer_id)
                .is_some_and(|existing| is_older(&announcement.data, &existing.data));
            if out_of_order {
                drop(state);
                self.node.stats.announcements_rejected.inc();
                tracing::debug!(peer = %peer_id, "ignoring out-of-order announcement");
                return false;
            }
            let is_new = match state.peers.get_mut(&peer_id) {
                Some(existing) => {
                    existing.data = announcement.data;
                    existing.last_seen_at = received_at;
                    false
                }
                None => {
                    state.peers.insert(
                        peer_id.clone(),
                        PeerRecord {
                            peer_id: peer_id.clone(),
                            data: announcement.data,
                            last_seen_at: received_at,
                        },
                    );
                    true
                }
            };
            self.node.update_gauges(&state);
            is_new
        };
        self.node.stats.announcements_received.inc();

        if !is_new {
            self.node.outlets.emit(CoordEvent::PeerUpdated { peer_id });
            return true;
        }

        tracing::info!(peer = %peer_id, relay = relay_capable, "discovered peer");
        // Joining the peer's private topic keeps us in its pubsub mesh; the
        // traffic itself is addressed to the peer, not to us.
        let ignore: TopicHandler = Arc::new(|_: TopicMessage| {});
        if let Err(e) = self
            .node
            .transport
            .subscribe(&private_topic(&peer_id), ignore)
            .await
        {
            tracing::warn!(peer = %peer_id, error = %e, "failed to join peer topic");
        }
        self.node.outlets.emit(CoordEvent::PeerDiscovered {
            peer_id: peer_id.clone(),
        });
        if relay_capable {
            self.relays.add_relay(&peer_id).await;
        }
        true
    }

    /// Publish our announcement on the coordination topic.
    pub async fn announce(&self) -> Result<(), CoordError> {
        let bytes = self.node.announcement().await.to_bytes()?;
        self.node
            .transport
            .publish(&self.node.config.topic, bytes)
            .await?;
        self.node.stats.announcements_sent.inc();
        tracing::trace!(topic = %self.node.config.topic, "announced");
        Ok(())
    }

    /// Reach fresh, unconnected peers through the relays, best relay first.
    ///
    /// Returns how many peers were connected this cycle.
    pub async fn refresh_peer_connections(&self) -> usize {
        let connected: HashSet<PeerId> = self
            .node
            .transport
            .list_connected()
            .await
            .into_iter()
            .map(|c| c.peer_id)
            .collect();

        let now = Utc::now();
        let threshold = self.node.config.freshness_threshold;
        let (candidates, relay_addrs) = {
            let state = self.node.state.lock().await;
            let candidates: Vec<PeerId> = state
                .peers
                .values()
                .filter(|p| !connected.contains(&p.peer_id))
                .filter(|p| !state.blacklist.contains(&p.peer_id))
                .filter(|p| is_fresh_at(p, now, threshold))
                .map(|p| p.peer_id.clone())
                .collect();
            let relay_addrs: Vec<String> = state.relays.iter().map(|r| r.dial_addr.clone()).collect();
            (candidates, relay_addrs)
        };

        let mut reached = 0;
        for peer in candidates {
            let mut ok = false;
            for relay_addr in &relay_addrs {
                if peer_id_from_addr(relay_addr).as_deref() == Some(peer.as_str()) {
                    continue;
                }
                if self.node.transport.connect(&relayed_addr(relay_addr, &peer)).await {
                    tracing::debug!(peer = %peer, relay = %relay_addr, "reached peer via relay");
                    ok = true;
                    break;
                }
            }
            if ok {
                reached += 1;
            } else {
                tracing::debug!(peer = %peer, "no relay reached peer this cycle");
            }
        }
        reached
    }

    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.node.state.lock().await.peers.values().cloned().collect()
    }

    pub async fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        self.node.state.lock().await.peers.get(peer_id).cloned()
    }
}

/// `incoming` was broadcast strictly before `stored` by the same incarnation
/// of the peer. A changed key or durable log means the peer restarted, and
/// its clock may have gone backwards.
fn is_older(incoming: &Announcement, stored: &Announcement) -> bool {
    let same_incarnation = incoming.encrypt_pub_key == stored.encrypt_pub_key
        && incoming.durable_log_id == stored.durable_log_id;
    match (incoming.broadcasted_at, stored.broadcasted_at) {
        (Some(new), Some(old)) => same_incarnation && new < old,
        _ => false,
    }
}
