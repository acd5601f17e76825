/// Relay manager: bootstrap, promotion, measurement and ranking of relays.
///
/// Relays come from two places. Bootstrap relays are seeded from
/// configuration at startup. Dynamic relays are promoted from peers that
/// announce `isCircuitRelay`. Connected dynamic relays are probed with
/// "about" requests through the messenger; the list is kept sorted best
/// first so peer refresh tries the fastest relay first.
pub mod remote;
mod types;

pub use types::{remove_duplicates, sort_relays, LatencyRing, RelayRecord, RelayTable};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;

use crate::error::CoordError;
use crate::events::CoordEvent;
use crate::messenger::Messenger;
use crate::node::Node;
use crate::types::{is_relayed_addr, peer_id_from_addr, PeerId, SENTINEL_LATENCY_MS};

#[derive(Clone)]
pub struct RelayManager {
    node: Arc<Node>,
    messenger: Messenger,
}

impl RelayManager {
    pub fn new(node: Arc<Node>, messenger: Messenger) -> Self {
        Self { node, messenger }
    }

    /// Seed bootstrap relays for our node class and dial each once.
    ///
    /// Failed dials are kept as `connected = false`; maintenance retries them.
    pub async fn initialize_relays(&self) {
        let config = &self.node.config;
        let mut addrs = config.bootstrap_relays().to_vec();
        if let Some(url) = &config.relay_list_url {
            match remote::fetch_relay_list(url).await {
                Ok(list) => remote::merge_relay_addrs(&mut addrs, list.for_class(config.node_class)),
                Err(e) => tracing::warn!(url = %url, error = %e, "remote relay list unavailable"),
            }
        }

        for addr in addrs {
            let peer_id = peer_id_from_addr(&addr).unwrap_or_else(|| addr.clone());
            if peer_id == self.node.id {
                continue;
            }
            let connected = self.node.transport.connect(&addr).await;
            if !connected {
                tracing::warn!(relay = %addr, "bootstrap relay unreachable");
            }
            let mut state = self.node.state.lock().await;
            state
                .relays
                .insert(RelayRecord::bootstrap(peer_id, addr, connected));
            self.node.update_gauges(&state);
        }

        let state = self.node.state.lock().await;
        tracing::info!(
            relays = state.relays.len(),
            connected = state.relays.iter().filter(|r| r.connected).count(),
            "bootstrap relays initialised"
        );
    }

    /// Promote a relay-capable peer. Idempotent.
    ///
    /// Returns `true` if the peer is (now) in the relay list, `false` if
    /// none of its direct addresses could be dialed.
    pub async fn add_relay(&self, peer_id: &str) -> bool {
        let dial_addrs = {
            let state = self.node.state.lock().await;
            if state.relays.contains(peer_id) {
                return true;
            }
            match state.peers.get(peer_id) {
                Some(peer) => peer.data.dial_addrs.clone(),
                None => return false,
            }
        };
        if peer_id == self.node.id {
            return false;
        }

        for addr in dial_addrs.iter().filter(|a| !is_relayed_addr(a)) {
            if !self.node.transport.connect(addr).await {
                continue;
            }
            let resolved = self
                .node
                .transport
                .list_connected()
                .await
                .into_iter()
                .find(|c| c.peer_id == peer_id)
                .map(|c| c.dial_addr)
                .unwrap_or_else(|| addr.clone());

            let mut state = self.node.state.lock().await;
            if state
                .relays
                .insert(RelayRecord::promoted(peer_id.to_string(), resolved.clone()))
            {
                self.node.update_gauges(&state);
                drop(state);
                tracing::info!(relay = %peer_id, addr = %resolved, "promoted relay");
                self.node.outlets.emit(CoordEvent::RelayPromoted {
                    peer_id: peer_id.to_string(),
                    dial_addr: resolved,
                });
            }
            return true;
        }
        tracing::debug!(relay = %peer_id, "no direct address of relay candidate answered");
        false
    }

    /// Probe every dynamic relay and push one latency sample each.
    ///
    /// Disconnected relays get the sentinel without a probe; a probe that
    /// times out records the timeout value.
    pub async fn measure_relays(&self) {
        let targets: Vec<(PeerId, bool)> = {
            let state = self.node.state.lock().await;
            state
                .relays
                .iter()
                .filter(|r| !r.is_bootstrap)
                .map(|r| (r.peer_id.clone(), r.connected))
                .collect()
        };

        let timeout = self.node.config.probe_timeout;
        let mut probes = JoinSet::new();
        for (peer_id, connected) in targets {
            let messenger = self.messenger.clone();
            probes.spawn(async move {
                let sample = if connected {
                    probe_sample(&messenger, &peer_id, timeout).await
                } else {
                    SENTINEL_LATENCY_MS
                };
                (peer_id, sample)
            });
        }

        while let Some(joined) = probes.join_next().await {
            let (peer_id, sample) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "relay probe task failed");
                    continue;
                }
            };
            let mut state = self.node.state.lock().await;
            if let Some(relay) = state.relays.get_mut(&peer_id) {
                relay.metrics.push(sample);
                tracing::debug!(relay = %peer_id, sample_ms = sample, score = relay.score(), "measured relay");
            }
        }
    }

    /// Order the relay list best first.
    pub async fn sort_relays(&self) {
        self.node.state.lock().await.relays.sort();
    }

    pub async fn remove_duplicates(&self) -> bool {
        let mut state = self.node.state.lock().await;
        let removed = state.relays.remove_duplicates();
        self.node.update_gauges(&state);
        removed
    }

    /// Make sure every relay has a live connection.
    ///
    /// Relays already connected (by address or peer id) are only marked as
    /// such; the rest are dialed and their outcome recorded.
    pub async fn connect_to_crs(&self) {
        let live = self.node.transport.list_connected().await;
        let live_ids: HashSet<&str> = live.iter().map(|c| c.peer_id.as_str()).collect();
        let live_addrs: HashSet<&str> = live.iter().map(|c| c.dial_addr.as_str()).collect();

        let targets: Vec<(PeerId, String)> = {
            let state = self.node.state.lock().await;
            state
                .relays
                .iter()
                .map(|r| (r.peer_id.clone(), r.dial_addr.clone()))
                .collect()
        };

        for (peer_id, addr) in targets {
            let already = live_ids.contains(peer_id.as_str()) || live_addrs.contains(addr.as_str());
            let connected = if already {
                true
            } else {
                let ok = self.node.transport.connect(&addr).await;
                if !ok {
                    tracing::debug!(relay = %peer_id, "relay dial failed");
                }
                ok
            };
            let mut state = self.node.state.lock().await;
            if let Some(relay) = state.relays.get_mut(&peer_id) {
                relay.connected = connected;
                if !already {
                    relay.updated_at = Utc::now();
                }
            }
        }

        let state = self.node.state.lock().await;
        self.node.update_gauges(&state);
    }

    /// Promote relay-capable peers not yet in the relay list.
    ///
    /// Returns how many were promoted.
    pub async fn discover_relays(&self) -> usize {
        let candidates: Vec<PeerId> = {
            let state = self.node.state.lock().await;
            state
                .peers
                .values()
                .filter(|p| p.data.is_circuit_relay && !state.relays.contains(&p.peer_id))
                .map(|p| p.peer_id.clone())
                .collect()
        };
        let mut promoted = 0;
        for peer_id in candidates {
            if self.add_relay(&peer_id).await {
                promoted += 1;
            }
        }
        promoted
    }

    /// measure → sort → dedup → connect.
    pub async fn run_maintenance(&self) -> Result<(), CoordError> {
        self.measure_relays().await;
        self.sort_relays().await;
        self.remove_duplicates().await;
        self.connect_to_crs().await;
        Ok(())
    }

    pub async fn relays(&self) -> Vec<RelayRecord> {
        self.node.state.lock().await.relays.to_vec()
    }
}

async fn probe_sample(messenger: &Messenger, peer_id: &str, timeout: Duration) -> u64 {
    match messenger.probe(peer_id, timeout).await {
        Ok(Some(rtt)) => rtt.as_millis() as u64,
        Ok(None) => timeout.as_millis() as u64,
        Err(e) => {
            tracing::debug!(relay = %peer_id, error = %e, "cannot probe relay");
            SENTINEL_LATENCY_MS
        }
    }
}
