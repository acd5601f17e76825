use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coord_protocol::{
    CoordConfig, CoordHandle, CoordNodeBuilder, CoordStats, MemoryHub, MemoryLog, SealedBoxCrypto,
};
use rand::seq::IndexedRandom;
use tokio::task::JoinSet;

use crate::events::{emit, EventProtocol};

pub struct SwarmConfig {
    pub nodes: usize,
    pub relays: usize,
    pub duration: Duration,
    /// Private messages each peer sends to random known peers.
    pub messages: u32,
    pub base: CoordConfig,
    pub json: bool,
}

pub struct NodeReport {
    pub id: String,
    pub relay: bool,
    pub peers: usize,
    pub relays: usize,
    pub messages_received: usize,
    pub stats: CoordStats,
}

pub struct SwarmReport {
    pub nodes: Vec<NodeReport>,
    pub messages_sent: u32,
    pub messages_acked: u32,
    pub send_failures: u32,
}

struct SimNode {
    id: String,
    relay: bool,
    handle: CoordHandle,
    received: Arc<AtomicUsize>,
}

/// Start relays, then peers bootstrapped on them, all on one hub.
async fn spawn_nodes(
    config: &SwarmConfig,
    hub: &MemoryHub,
    log: &MemoryLog,
    start: Instant,
) -> anyhow::Result<Vec<SimNode>> {
    let mut nodes = Vec::with_capacity(config.relays + config.nodes);
    let mut relay_addrs = Vec::new();

    let specs = (0..config.relays)
        .map(|i| (format!("relay-{i}"), true))
        .chain((0..config.nodes).map(|i| (format!("peer-{i}"), false)));
    for (id, relay) in specs {
        let node_config = if relay {
            config.base.clone().circuit_relay(true)
        } else {
            config
                .base
                .clone()
                .server_relays(relay_addrs.clone())
                .browser_relays(relay_addrs.clone())
        };
        let channels = CoordNodeBuilder::new(node_config)
            .transport(hub.transport(id.as_str()))
            .durable_log(log.clone())
            .crypto(SealedBoxCrypto::new())
            .start()
            .await?;
        if relay {
            relay_addrs.extend(hub.addr_of(&id));
        }

        let received = Arc::new(AtomicUsize::new(0));
        let mut messages = channels.messages;
        let counter = received.clone();
        tokio::spawn(async move {
            while messages.recv().await.is_some() {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        let mut events = channels.events;
        let node_id = id.clone();
        let json = config.json;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::debug!(node = %node_id, ?event, "protocol event");
                if json {
                    emit(&EventProtocol {
                        event: "protocol",
                        node: node_id.clone(),
                        detail: format!("{event:?}"),
                        elapsed_s: start.elapsed().as_secs_f64(),
                    });
                }
            }
        });

        nodes.push(SimNode {
            id,
            relay,
            handle: channels.handle,
            received,
        });
    }
    Ok(nodes)
}

pub async fn run(config: SwarmConfig, start: Instant) -> anyhow::Result<SwarmReport> {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let nodes = spawn_nodes(&config, &hub, &log, start).await?;

    // Everyone announces once more so late starters are learned by early ones.
    for node in &nodes {
        node.handle.announce().await?;
    }
    tokio::time::sleep(config.base.intervals.announce).await;

    let sent = Arc::new(AtomicU32::new(0));
    let acked = Arc::new(AtomicU32::new(0));
    let failures = Arc::new(AtomicU32::new(0));
    let ack_wait = config.base.retry_interval * (config.base.retry_limit + 1);
    let mut deliveries = JoinSet::new();

    for node in nodes.iter().filter(|n| !n.relay) {
        let known: Vec<String> = node
            .handle
            .peers()
            .await
            .into_iter()
            .filter(|p| !p.data.is_circuit_relay)
            .map(|p| p.peer_id)
            .collect();
        for seq in 0..config.messages {
            let Some(target) = known.choose(&mut rand::rng()).cloned() else {
                break;
            };
            let payload = format!("{} says hello #{seq}", node.id);
            match node.handle.send(&target, payload.as_bytes()).await {
                Ok(pending) => {
                    sent.fetch_add(1, Ordering::Relaxed);
                    let acked = acked.clone();
                    deliveries.spawn(async move {
                        if pending.acknowledged(ack_wait).await {
                            acked.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(from = %node.id, to = %target, error = %e, "send failed");
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    let remaining = config.duration.saturating_sub(start.elapsed());
    tokio::select! {
        _ = tokio::time::sleep(remaining) => {}
        _ = tokio::signal::ctrl_c() => eprintln!("\nCtrl+C received, shutting down..."),
    }
    deliveries.abort_all();
    while deliveries.join_next().await.is_some() {}

    let mut reports = Vec::with_capacity(nodes.len());
    for node in &nodes {
        reports.push(NodeReport {
            id: node.id.clone(),
            relay: node.relay,
            peers: node.handle.peers().await.len(),
            relays: node.handle.relays().await.len(),
            messages_received: node.received.load(Ordering::Relaxed),
            stats: node.handle.stats(),
        });
        node.handle.shutdown();
    }

    Ok(SwarmReport {
        nodes: reports,
        messages_sent: sent.load(Ordering::Relaxed),
        messages_acked: acked.load(Ordering::Relaxed),
        send_failures: failures.load(Ordering::Relaxed),
    })
}
