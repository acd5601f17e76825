/// Connection access control.
///
/// The blacklist hangs up on listed peer ids and addresses every cycle. The
/// whitelist hangs up on any connection that is neither a known
/// coordination peer nor one of our relays.
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::CoordError;
use crate::node::Node;
use crate::types::PeerId;

#[derive(Clone)]
pub struct AccessControl {
    node: Arc<Node>,
}

impl AccessControl {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    /// Disconnect every blacklisted entry. Returns how many hang-ups took effect.
    pub async fn enforce_blacklist(&self) -> usize {
        let entries: Vec<String> = self.node.state.lock().await.blacklist.iter().cloned().collect();
        let mut dropped = 0;
        for entry in entries {
            if self.node.transport.disconnect(&entry).await {
                tracing::info!(target_peer = %entry, "disconnected blacklisted peer");
                dropped += 1;
            }
        }
        dropped
    }

    /// Disconnect connections to nodes outside the coordination network.
    pub async fn enforce_whitelist(&self) -> usize {
        let live = self.node.transport.list_connected().await;
        let allowed: HashSet<PeerId> = {
            let state = self.node.state.lock().await;
            state
                .peers
                .keys()
                .cloned()
                .chain(state.relays.iter().map(|r| r.peer_id.clone()))
                .collect()
        };
        let mut dropped = 0;
        for conn in live.into_iter().filter(|c| !allowed.contains(&c.peer_id)) {
            if self.node.transport.disconnect(&conn.peer_id).await {
                tracing::debug!(peer = %conn.peer_id, "disconnected non-coordination peer");
                dropped += 1;
            }
        }
        dropped
    }

    pub async fn enforce(&self) -> Result<(), CoordError> {
        self.enforce_blacklist().await;
        self.enforce_whitelist().await;
        Ok(())
    }

    pub async fn block(&self, peer_or_addr: impl Into<String>) {
        self.node.state.lock().await.blacklist.insert(peer_or_addr.into());
    }

    pub async fn unblock(&self, peer_or_addr: &str) -> bool {
        self.node.state.lock().await.blacklist.remove(peer_or_addr)
    }
}
