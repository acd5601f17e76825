/// In-process collaborators: a simulated P2P network and a shared durable log.
///
/// [`MemoryHub`] plays the network. Each [`MemoryTransport`] it hands out is
/// one node. Publishes fan out synchronously to every subscriber of the
/// topic (the publisher included, as pubsub meshes echo). Dialing obeys a
/// simple reachability model: a direct address needs the target to be
/// reachable, a `/p2p-circuit` address only needs the relay to be.
///
/// [`MemoryLog`] is a single store shared by every node, so an append is
/// immediately "replicated" and fires the log's replication callbacks.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::CoordError;
use crate::transport::{
    Connection, DurableLog, LogHandle, ReplicateHandler, TopicHandler, TopicMessage, Transport,
};
use crate::types::{is_relayed_addr, peer_id_from_addr, PeerId, RELAY_HOP_SEGMENT};

/// Publishes kept by the hub for inspection. Older ones are forgotten.
pub const PUBLISH_HISTORY: usize = 4096;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A publish recorded by the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub from: PeerId,
    pub topic: String,
    pub data: Vec<u8>,
}

struct HubNode {
    addr: String,
    reachable: bool,
    deaf: bool,
}

#[derive(Default)]
struct HubState {
    nodes: HashMap<PeerId, HubNode>,
    subscriptions: HashMap<String, Vec<(PeerId, TopicHandler)>>,
    connections: HashMap<PeerId, Vec<Connection>>,
    published: VecDeque<Published>,
    disconnects: Vec<(PeerId, String)>,
    next_port: u16,
}

/// Simulated broadcast network.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its transport.
    pub fn transport(&self, peer_id: impl Into<PeerId>) -> MemoryTransport {
        let peer_id = peer_id.into();
        let mut state = lock(&self.state);
        state.next_port += 1;
        let addr = format!("/ip4/127.0.0.1/tcp/{}/p2p/{peer_id}", 4000 + state.next_port);
        state.nodes.insert(
            peer_id.clone(),
            HubNode {
                addr,
                reachable: true,
                deaf: false,
            },
        );
        MemoryTransport {
            hub: self.clone(),
            peer_id,
        }
    }

    /// Listen address of a registered node.
    pub fn addr_of(&self, peer_id: &str) -> Option<String> {
        lock(&self.state).nodes.get(peer_id).map(|n| n.addr.clone())
    }

    /// Unreachable nodes refuse direct dials but can still be reached via relays.
    pub fn set_reachable(&self, peer_id: &str, reachable: bool) {
        if let Some(node) = lock(&self.state).nodes.get_mut(peer_id) {
            node.reachable = reachable;
        }
    }

    /// A deaf node's topic handlers stop receiving anything.
    pub fn set_deaf(&self, peer_id: &str, deaf: bool) {
        if let Some(node) = lock(&self.state).nodes.get_mut(peer_id) {
            node.deaf = deaf;
        }
    }

    /// The last [`PUBLISH_HISTORY`] publishes, oldest first.
    pub fn published(&self) -> Vec<Published> {
        lock(&self.state).published.iter().cloned().collect()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        lock(&self.state)
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Nodes subscribed to `topic` (one entry per subscription).
    pub fn subscribers(&self, topic: &str) -> Vec<PeerId> {
        lock(&self.state)
            .subscriptions
            .get(topic)
            .map(|subs| subs.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn connections_of(&self, peer_id: &str) -> Vec<Connection> {
        lock(&self.state)
            .connections
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every `disconnect` target requested by `peer_id`.
    pub fn disconnect_calls(&self, peer_id: &str) -> Vec<String> {
        lock(&self.state)
            .disconnects
            .iter()
            .filter(|(who, _)| who == peer_id)
            .map(|(_, target)| target.clone())
            .collect()
    }

    fn publish(&self, from: &str, topic: &str, data: Vec<u8>) {
        let handlers: Vec<TopicHandler> = {
            let mut state = lock(&self.state);
            if state.published.len() == PUBLISH_HISTORY {
                state.published.pop_front();
            }
            state.published.push_back(Published {
                from: from.to_string(),
                topic: topic.to_string(),
                data: data.clone(),
            });
            let subs = match state.subscriptions.get(topic) {
                Some(subs) => subs,
                None => return,
            };
            subs.iter()
                .filter(|(id, _)| state.nodes.get(id).is_some_and(|n| !n.deaf))
                .map(|(_, h)| h.clone())
                .collect()
        };
        // Handlers run outside the lock: they may call back into the hub.
        for handler in handlers {
            handler(TopicMessage {
                topic: topic.to_string(),
                from: from.to_string(),
                data: data.clone(),
            });
        }
    }

    fn connect(&self, from: &str, addr: &str) -> bool {
        let Some(target) = peer_id_from_addr(addr) else {
            return false;
        };
        if target == from {
            return false;
        }
        let mut state = lock(&self.state);
        let dialable = if is_relayed_addr(addr) {
            let relay_part = addr.split(RELAY_HOP_SEGMENT).next().unwrap_or_default();
            let relay_ok = peer_id_from_addr(relay_part)
                .and_then(|relay| state.nodes.get(&relay))
                .is_some_and(|relay| relay.reachable);
            relay_ok && state.nodes.contains_key(&target)
        } else {
            state.nodes.get(&target).is_some_and(|n| n.reachable)
        };
        if !dialable {
            return false;
        }
        let Some(from_addr) = state.nodes.get(from).map(|n| n.addr.clone()) else {
            return false;
        };
        upsert_connection(&mut state, from, &target, addr);
        upsert_connection(&mut state, &target, from, &from_addr);
        true
    }

    fn disconnect(&self, from: &str, peer_or_addr: &str) -> bool {
        let mut state = lock(&self.state);
        state
            .disconnects
            .push((from.to_string(), peer_or_addr.to_string()));
        let dropped: Vec<PeerId> = match state.connections.get_mut(from) {
            Some(conns) => {
                let mut dropped = Vec::new();
                conns.retain(|c| {
                    let hit = c.peer_id == peer_or_addr || c.dial_addr == peer_or_addr;
                    if hit {
                        dropped.push(c.peer_id.clone());
                    }
                    !hit
                });
                dropped
            }
            None => Vec::new(),
        };
        for peer in &dropped {
            if let Some(conns) = state.connections.get_mut(peer) {
                conns.retain(|c| c.peer_id != from);
            }
        }
        !dropped.is_empty()
    }
}

fn upsert_connection(state: &mut HubState, owner: &str, peer: &str, addr: &str) {
    let conns = state.connections.entry(owner.to_string()).or_default();
    conns.retain(|c| c.peer_id != peer);
    conns.push(Connection {
        peer_id: peer.to_string(),
        dial_addr: addr.to_string(),
    });
}

/// One node's view of a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    peer_id: PeerId,
}

impl MemoryTransport {
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    async fn listen_addrs(&self) -> Vec<String> {
        self.hub.addr_of(&self.peer_id).into_iter().collect()
    }

    async fn subscribe(&self, topic: &str, handler: TopicHandler) -> Result<(), CoordError> {
        lock(&self.hub.state)
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .push((self.peer_id.clone(), handler));
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), CoordError> {
        self.hub.publish(&self.peer_id, topic, data);
        Ok(())
    }

    async fn connect(&self, addr: &str) -> bool {
        self.hub.connect(&self.peer_id, addr)
    }

    async fn disconnect(&self, peer_or_addr: &str) -> bool {
        self.hub.disconnect(&self.peer_id, peer_or_addr)
    }

    async fn list_connected(&self) -> Vec<Connection> {
        self.hub.connections_of(&self.peer_id)
    }
}

// ── Durable log ─────────────────────────────────────────────────────────

#[derive(Default)]
struct LogState {
    entries: HashMap<String, Vec<Vec<u8>>>,
    handlers: HashMap<String, Vec<ReplicateHandler>>,
    opened: u64,
}

/// Shared append-only log store. Clone it into every node.
#[derive(Clone, Default)]
pub struct MemoryLog {
    state: Arc<Mutex<LogState>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, log_id: &str) -> Vec<Vec<u8>> {
        lock(&self.state)
            .entries
            .get(log_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DurableLog for MemoryLog {
    async fn open(&self, owner: &str) -> Result<LogHandle, CoordError> {
        let mut state = lock(&self.state);
        state.opened += 1;
        let id = format!("/log/{owner}/{}", state.opened);
        state.entries.insert(id.clone(), Vec::new());
        Ok(LogHandle { id })
    }

    async fn append(&self, log_id: &str, entry: Vec<u8>) -> Result<(), CoordError> {
        let handlers = {
            let mut state = lock(&self.state);
            let Some(log) = state.entries.get_mut(log_id) else {
                return Err(CoordError::DurableLog(format!("no such log: {log_id}")));
            };
            log.push(entry);
            state.handlers.get(log_id).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(log_id.to_string());
        }
        Ok(())
    }

    async fn tail(&self, log_id: &str, n: usize) -> Result<Vec<Vec<u8>>, CoordError> {
        let state = lock(&self.state);
        let log = state
            .entries
            .get(log_id)
            .ok_or_else(|| CoordError::DurableLog(format!("no such log: {log_id}")))?;
        let start = log.len().saturating_sub(n);
        Ok(log[start..].to_vec())
    }

    async fn on_replicate(
        &self,
        log_id: &str,
        handler: ReplicateHandler,
    ) -> Result<(), CoordError> {
        lock(&self.state)
            .handlers
            .entry(log_id.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}
