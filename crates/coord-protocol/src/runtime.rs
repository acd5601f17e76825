/// Runtime wiring: collaborators in, running coordinator out.
///
/// [`CoordNodeBuilder::start`] creates the identity, opens the durable log,
/// subscribes the coordination and private topics, seeds relays, announces
/// once, then spawns the inbound loop and the maintenance scheduler. The
/// application talks to the node through [`CoordHandle`] and receives
/// delivered messages and events on the [`RuntimeChannels`] receivers.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::access::AccessControl;
use crate::config::CoordConfig;
use crate::error::CoordError;
use crate::events::{CoordEvent, DeliveredMessage, Outlets};
use crate::messenger::{EntrySource, Messenger, PendingDelivery};
use crate::node::{Node, SelfRecord};
use crate::registry::{PeerRecord, PeerRegistry};
use crate::relays::{RelayManager, RelayRecord};
use crate::scheduler::{
    task_fn, Scheduler, TASK_ACCESS_CONTROL, TASK_ANNOUNCE, TASK_REFRESH_PEERS,
    TASK_RELAY_DISCOVERY, TASK_RELAY_MAINTENANCE,
};
use crate::schema::{parse_broadcast, AboutResponse};
use crate::stats::CoordStats;
use crate::transport::{
    Crypto, DurableLog, ReplicateHandler, TopicHandler, TopicMessage, Transport,
};
use crate::types::{private_topic, PeerId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Work funneled from transport callbacks into the inbound loop.
#[derive(Debug)]
enum Inbound {
    Broadcast(TopicMessage),
    Private(Vec<u8>),
    LogReplicated(String),
}

/// Channels returned to the application when the node starts.
pub struct RuntimeChannels {
    pub handle: CoordHandle,
    /// Decrypted application messages.
    pub messages: mpsc::Receiver<DeliveredMessage>,
    pub events: mpsc::Receiver<CoordEvent>,
}

/// Collects collaborators and configuration, then starts the node.
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), coord_protocol::CoordError> {
/// use coord_protocol::{CoordConfig, CoordNodeBuilder, MemoryHub, MemoryLog, SealedBoxCrypto};
///
/// let hub = MemoryHub::new();
/// let channels = CoordNodeBuilder::new(CoordConfig::new())
///     .transport(hub.transport("QmNode"))
///     .durable_log(MemoryLog::new())
///     .crypto(SealedBoxCrypto::new())
///     .start()
///     .await?;
/// channels.handle.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct CoordNodeBuilder {
    config: CoordConfig,
    transport: Option<Arc<dyn Transport>>,
    log: Option<Arc<dyn DurableLog>>,
    crypto: Option<Arc<dyn Crypto>>,
}

impl CoordNodeBuilder {
    pub fn new(config: CoordConfig) -> Self {
        Self {
            config,
            transport: None,
            log: None,
            crypto: None,
        }
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn durable_log(mut self, log: impl DurableLog + 'static) -> Self {
        self.log = Some(Arc::new(log));
        self
    }

    pub fn crypto(mut self, crypto: impl Crypto + 'static) -> Self {
        self.crypto = Some(Arc::new(crypto));
        self
    }

    pub async fn start(self) -> Result<RuntimeChannels, CoordError> {
        let transport = self
            .transport
            .ok_or(CoordError::MissingCollaborator("transport"))?;
        let log = self
            .log
            .ok_or(CoordError::MissingCollaborator("durable log"))?;
        let crypto = self.crypto.ok_or(CoordError::MissingCollaborator("crypto"))?;
        let config = self.config;

        let identity = crypto.generate_identity()?;
        let node_id = transport.local_peer_id();
        let dial_addrs = transport.listen_addrs().await;
        let log_handle = log.open(&node_id).await?;
        let self_record = SelfRecord::new(&config, node_id.clone(), dial_addrs, &identity, log_handle.id.clone());

        let capacity = config.inbound_capacity.max(1);
        let (msg_tx, msg_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let outlets = Outlets::new(msg_tx, event_tx);

        let intervals = config.intervals.clone();
        let topic = config.topic.clone();
        let node = Node::new(config, identity, self_record, transport, log, crypto, outlets.clone());

        let messenger = Messenger::new(node.clone());
        let relays = RelayManager::new(node.clone(), messenger.clone());
        let registry = PeerRegistry::new(node.clone(), relays.clone());
        let access = AccessControl::new(node.clone());
        let scheduler = Scheduler::new(outlets);

        node.transport
            .subscribe(&topic, broadcast_handler(inbound_tx.clone()))
            .await?;
        node.transport
            .subscribe(&private_topic(&node_id), private_handler(inbound_tx.clone()))
            .await?;
        node.log
            .on_replicate(&log_handle.id, replicate_handler(inbound_tx.clone()))
            .await?;

        relays.initialize_relays().await;
        if let Err(e) = registry.announce().await {
            tracing::warn!(error = %e, "initial announcement failed");
        }

        let inbound_task = tokio::spawn(inbound_loop(
            node.clone(),
            registry.clone(),
            messenger.clone(),
            inbound_rx,
        ));

        {
            let r = registry.clone();
            scheduler.spawn_task(
                TASK_ANNOUNCE,
                intervals.announce,
                task_fn(move || {
                    let r = r.clone();
                    async move { r.announce().await }
                }),
            );
            let r = registry.clone();
            scheduler.spawn_task(
                TASK_REFRESH_PEERS,
                intervals.refresh_peers,
                task_fn(move || {
                    let r = r.clone();
                    async move {
                        r.refresh_peer_connections().await;
                        Ok(())
                    }
                }),
            );
            let m = relays.clone();
            scheduler.spawn_task(
                TASK_RELAY_MAINTENANCE,
                intervals.relay_maintenance,
                task_fn(move || {
                    let m = m.clone();
                    async move { m.run_maintenance().await }
                }),
            );
            let m = relays.clone();
            scheduler.spawn_task(
                TASK_RELAY_DISCOVERY,
                intervals.relay_discovery,
                task_fn(move || {
                    let m = m.clone();
                    async move {
                        m.discover_relays().await;
                        Ok(())
                    }
                }),
            );
            let a = access.clone();
            scheduler.spawn_task(
                TASK_ACCESS_CONTROL,
                intervals.access_control,
                task_fn(move || {
                    let a = a.clone();
                    async move { a.enforce().await }
                }),
            );
        }

        tracing::info!(node = %node_id, topic = %topic, "coordination node started");

        let handle = CoordHandle {
            node,
            messenger,
            registry,
            relays,
            access,
            scheduler,
            inbound_tx,
            inbound_task: Arc::new(Mutex::new(Some(inbound_task))),
            closed: Arc::new(AtomicBool::new(false)),
        };
        Ok(RuntimeChannels {
            handle,
            messages: msg_rx,
            events: event_rx,
        })
    }
}

fn forward(tx: &mpsc::Sender<Inbound>, item: Inbound) {
    if let Err(e) = tx.try_send(item) {
        tracing::debug!(error = %e, "inbound queue rejected event");
    }
}

fn broadcast_handler(tx: mpsc::Sender<Inbound>) -> TopicHandler {
    Arc::new(move |msg: TopicMessage| forward(&tx, Inbound::Broadcast(msg)))
}

fn private_handler(tx: mpsc::Sender<Inbound>) -> TopicHandler {
    Arc::new(move |msg: TopicMessage| forward(&tx, Inbound::Private(msg.data)))
}

fn replicate_handler(tx: mpsc::Sender<Inbound>) -> ReplicateHandler {
    Arc::new(move |log_id: String| forward(&tx, Inbound::LogReplicated(log_id)))
}

/// Single consumer of inbound work. Each item runs to completion.
async fn inbound_loop(
    node: Arc<Node>,
    registry: PeerRegistry,
    messenger: Messenger,
    mut rx: mpsc::Receiver<Inbound>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Inbound::Broadcast(msg) => {
                if let Some(announcement) = parse_broadcast(&msg, &node.id) {
                    registry.add_subnet_peer(announcement).await;
                }
            }
            Inbound::Private(bytes) => {
                messenger.handle_private_entry(&bytes, EntrySource::PrivateTopic).await;
            }
            Inbound::LogReplicated(log_id) => {
                let own = node.state.lock().await.self_record.durable_log_id.clone();
                if log_id != own {
                    continue;
                }
                if let Err(e) = messenger.drain_durable_log().await {
                    tracing::warn!(log = %log_id, error = %e, "failed to read durable log");
                }
            }
        }
    }
    tracing::debug!(node = %node.id, "inbound loop finished");
}

/// Application-facing handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct CoordHandle {
    node: Arc<Node>,
    messenger: Messenger,
    registry: PeerRegistry,
    relays: RelayManager,
    access: AccessControl,
    scheduler: Scheduler,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    closed: Arc<AtomicBool>,
}

impl CoordHandle {
    pub fn peer_id(&self) -> &str {
        self.node.id()
    }

    fn ensure_running(&self) -> Result<(), CoordError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordError::Shutdown);
        }
        Ok(())
    }

    /// Send an encrypted private message with ACK-driven retries.
    pub async fn send(&self, receiver: &str, payload: &[u8]) -> Result<PendingDelivery, CoordError> {
        self.ensure_running()?;
        self.messenger.send_msg(receiver, payload).await
    }

    /// Ask a peer for its current announcement.
    pub async fn query_about(
        &self,
        peer_id: &str,
        timeout: Duration,
    ) -> Result<Option<AboutResponse>, CoordError> {
        self.ensure_running()?;
        self.messenger.query_about(peer_id, timeout).await
    }

    /// Publish our announcement now instead of waiting for the next tick.
    pub async fn announce(&self) -> Result<(), CoordError> {
        self.ensure_running()?;
        self.registry.announce().await
    }

    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.registry.peers().await
    }

    pub async fn peer(&self, peer_id: &str) -> Option<PeerRecord> {
        self.registry.get(peer_id).await
    }

    /// Relay list in its current (preference) order.
    pub async fn relays(&self) -> Vec<RelayRecord> {
        self.relays.relays().await
    }

    pub async fn self_record(&self) -> SelfRecord {
        self.node.self_record().await
    }

    /// Snapshot of the node's counters.
    pub fn stats(&self) -> CoordStats {
        CoordStats::clone(self.node.stats())
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn relay_manager(&self) -> &RelayManager {
        &self.relays
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn scheduled_tasks(&self) -> Vec<String> {
        self.scheduler.task_names()
    }

    /// Stop one maintenance task by name.
    pub fn cancel_task(&self, name: &str) -> bool {
        self.scheduler.cancel(name)
    }

    pub async fn block(&self, peer_or_addr: impl Into<String>) {
        self.access.block(peer_or_addr).await;
    }

    pub async fn unblock(&self, peer_or_addr: &str) -> bool {
        self.access.unblock(peer_or_addr).await
    }

    /// Open a fresh durable log and advertise it from the next announcement.
    ///
    /// Returns the new log id.
    pub async fn rotate_durable_log(&self) -> Result<String, CoordError> {
        self.ensure_running()?;
        let handle = self.node.log.open(&self.node.id).await?;
        self.node
            .log
            .on_replicate(&handle.id, replicate_handler(self.inbound_tx.clone()))
            .await?;
        self.node.state.lock().await.self_record.durable_log_id = handle.id.clone();
        tracing::info!(log = %handle.id, "rotated durable log");
        self.node.outlets.emit(CoordEvent::DurableLogRotated {
            log_id: handle.id.clone(),
        });
        Ok(handle.id)
    }

    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Stop scheduler tasks, the inbound loop and every pending retry.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.shutdown();
        if let Some(task) = lock(&self.inbound_task).take() {
            task.abort();
        }
        self.messenger.cancel_all();
        tracing::info!(node = %self.node.id, "coordination node stopped");
    }
}

impl std::fmt::Debug for CoordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordHandle")
            .field("peer_id", &self.node.id)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Peer ids in `records`, sorted. Convenience for logs and tests.
pub fn peer_ids(records: &[PeerRecord]) -> Vec<PeerId> {
    let mut ids: Vec<PeerId> = records.iter().map(|r| r.peer_id.clone()).collect();
    ids.sort();
    ids
}
