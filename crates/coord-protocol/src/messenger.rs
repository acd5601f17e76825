/// Reliable private messaging over a lossy broadcast transport.
///
/// Every outbound message is encrypted for the receiver, published once on
/// the receiver's private topic, mirrored into the receiver's durable log,
/// and republished every retry interval until an ACK with the same uuid
/// arrives or the retry limit is reached. Inbound entries are ACKed,
/// deduplicated, decrypted and dispatched.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::envelope::Envelope;
use crate::error::CoordError;
use crate::events::{CoordEvent, DeliveredMessage};
use crate::node::Node;
use crate::schema::{AboutRequest, AboutResponse, PrivatePayload};
use crate::types::{private_topic, PeerId, DURABLE_TAIL_LEN};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An outstanding message being republished until acknowledged.
struct RetryTask {
    receiver: PeerId,
    handle: Option<JoinHandle<()>>,
    acked: Option<oneshot::Sender<()>>,
}

type RetryTable = Arc<Mutex<HashMap<String, RetryTask>>>;
type AboutTable = Arc<Mutex<HashMap<String, oneshot::Sender<AboutResponse>>>>;

/// Where an inbound private entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    /// Our private pubsub topic. Senders republish here until ACKed.
    PrivateTopic,
    /// A replay of our durable log tail, which repeats old entries.
    DurableLog,
}

/// Returned by [`Messenger::send_msg`]. Dropping it does not cancel delivery.
#[derive(Debug)]
pub struct PendingDelivery {
    pub uuid: String,
    ack: oneshot::Receiver<()>,
}

impl PendingDelivery {
    /// Wait up to `timeout` for the receiver's ACK.
    ///
    /// `false` on timeout or once retries are exhausted.
    pub async fn acknowledged(self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.ack).await, Ok(Ok(())))
    }
}

#[derive(Clone)]
pub struct Messenger {
    node: Arc<Node>,
    retries: RetryTable,
    about: AboutTable,
}

impl Messenger {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            retries: Arc::new(Mutex::new(HashMap::new())),
            about: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Encrypt `payload` for `receiver` and send it with retries.
    ///
    /// Fails only before the first publish: unknown receiver, no announced
    /// key, encryption or transport failure. After that, delivery problems
    /// are handled by retries and never reach the caller.
    pub async fn send_msg(&self, receiver: &str, payload: &[u8]) -> Result<PendingDelivery, CoordError> {
        let (public_key, durable_log_id) = {
            let state = self.node.state.lock().await;
            let peer = state.peers.get(receiver).ok_or_else(|| CoordError::UnknownPeer {
                peer_id: receiver.to_string(),
            })?;
            let key = peer.data.encrypt_pub_key.clone().ok_or_else(|| {
                CoordError::MissingPublicKey {
                    peer_id: receiver.to_string(),
                }
            })?;
            (key, peer.data.durable_log_id.clone())
        };

        let ciphertext = self.node.crypto.encrypt(&public_key, payload)?;
        let envelope = Envelope::new(self.node.id.clone(), receiver.to_string(), &ciphertext);
        let bytes = envelope.to_bytes()?;
        let topic = private_topic(receiver);

        self.node.transport.publish(&topic, bytes.clone()).await?;
        self.node.stats.messages_sent.inc();
        tracing::debug!(to = %receiver, uuid = %envelope.uuid, "sent private message");

        if let Some(log_id) = durable_log_id {
            match self.node.log.append(&log_id, bytes.clone()).await {
                Ok(()) => self.node.stats.durable_appends.inc(),
                Err(e) => {
                    tracing::warn!(to = %receiver, error = %e, "durable log append failed")
                }
            }
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        // Registered before the task exists: the task removes its entry when done.
        lock(&self.retries).insert(
            envelope.uuid.clone(),
            RetryTask {
                receiver: receiver.to_string(),
                handle: None,
                acked: Some(ack_tx),
            },
        );
        let handle = self.spawn_retry(envelope.uuid.clone(), receiver.to_string(), topic, bytes);
        match lock(&self.retries).get_mut(&envelope.uuid) {
            Some(task) => task.handle = Some(handle),
            // Already acked, cancelled or exhausted.
            None => handle.abort(),
        }

        Ok(PendingDelivery {
            uuid: envelope.uuid,
            ack: ack_rx,
        })
    }

    fn spawn_retry(&self, uuid: String, receiver: PeerId, topic: String, bytes: Vec<u8>) -> JoinHandle<()> {
        let node = self.node.clone();
        let retries = self.retries.clone();
        let interval = node.config.retry_interval;
        let limit = node.config.retry_limit;
        tokio::spawn(async move {
            let mut retry_count = 0;
            while retry_count < limit {
                tokio::time::sleep(interval).await;
                if let Err(e) = node.transport.publish(&topic, bytes.clone()).await {
                    tracing::debug!(to = %receiver, uuid = %uuid, error = %e, "retry publish failed");
                }
                retry_count += 1;
                node.stats.retries.inc();
            }
            // Dropping the entry drops the ACK sender: waiters see "not acknowledged".
            let abandoned = lock(&retries).remove(&uuid);
            if let Some(task) = abandoned {
                node.stats.retries_exhausted.inc();
                tracing::debug!(to = %receiver, uuid = %uuid, "giving up after {limit} retries");
                node.outlets.emit(CoordEvent::MessageAbandoned { uuid, receiver });
                drop(task);
            }
        })
    }

    /// Publish an ACK for `original` to its sender, once.
    pub async fn send_ack(&self, original: &Envelope) {
        let ack = Envelope::ack_for(original);
        let bytes = match ack.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode ACK");
                return;
            }
        };
        match self.node.transport.publish(&private_topic(&ack.receiver), bytes).await {
            Ok(()) => self.node.stats.acks_sent.inc(),
            Err(e) => tracing::debug!(to = %ack.receiver, error = %e, "ACK publish failed"),
        }
    }

    /// Stop retrying `uuid`. `true` the first time, `false` for unknown or repeated ACKs.
    pub fn handle_ack(&self, uuid: &str) -> bool {
        let Some(mut task) = lock(&self.retries).remove(uuid) else {
            return false;
        };
        if let Some(handle) = task.handle.take() {
            handle.abort();
        }
        if let Some(tx) = task.acked.take() {
            let _ = tx.send(());
        }
        self.node.stats.acks_received.inc();
        tracing::debug!(from = %task.receiver, uuid = %uuid, "message acknowledged");
        self.node.outlets.emit(CoordEvent::MessageAcked {
            uuid: uuid.to_string(),
        });
        true
    }

    /// Ask `peer_id` for its announcement. `Ok(None)` on timeout.
    pub async fn query_about(
        &self,
        peer_id: &str,
        timeout: Duration,
    ) -> Result<Option<AboutResponse>, CoordError> {
        let request = AboutRequest::new();
        let body = serde_json::to_vec(&request)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.about).insert(request.id.clone(), tx);

        if let Err(e) = self.send_msg(peer_id, &body).await {
            lock(&self.about).remove(&request.id);
            return Err(e);
        }
        self.node.stats.probes_sent.inc();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(Some(response)),
            _ => {
                lock(&self.about).remove(&request.id);
                self.node.stats.probes_timed_out.inc();
                Ok(None)
            }
        }
    }

    /// Round-trip time of an about probe, or `None` on timeout.
    pub async fn probe(&self, peer_id: &str, timeout: Duration) -> Result<Option<Duration>, CoordError> {
        let start = Instant::now();
        Ok(self
            .query_about(peer_id, timeout)
            .await?
            .map(|_| start.elapsed()))
    }

    /// Handle one entry from our private topic or durable log.
    ///
    /// Malformed entries and entries for other receivers are dropped
    /// silently. Topic copies are ACKed every time, since an earlier ACK may
    /// have been lost. Log entries are ACKed on first sight only.
    pub async fn handle_private_entry(&self, bytes: &[u8], source: EntrySource) {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(env) => env,
            Err(e) => {
                tracing::trace!(error = %e, "dropping malformed private entry");
                return;
            }
        };
        if envelope.receiver != self.node.id {
            return;
        }
        if envelope.is_ack() {
            self.handle_ack(&envelope.uuid);
            return;
        }

        let first = self.node.first_sighting(&envelope.dedup_key()).await;
        if first || source == EntrySource::PrivateTopic {
            self.send_ack(&envelope).await;
        }
        if !first {
            tracing::trace!(uuid = %envelope.uuid, "duplicate private entry");
            return;
        }

        let plaintext = match envelope
            .ciphertext()
            .and_then(|ct| self.node.crypto.decrypt(&self.node.identity.secret, &ct))
        {
            Ok(pt) => pt,
            Err(e) => {
                self.node.stats.decrypt_failures.inc();
                tracing::warn!(from = %envelope.sender, error = %e, "failed to decrypt private message");
                return;
            }
        };

        match PrivatePayload::classify(plaintext) {
            PrivatePayload::AboutRequest(request) => self.answer_about(&envelope.sender, request).await,
            PrivatePayload::AboutResponse(response) => {
                match lock(&self.about).remove(&response.id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(id = %response.id, "late or unsolicited about response"),
                }
            }
            PrivatePayload::App(payload) => {
                let delivered = self.node.outlets.deliver(DeliveredMessage {
                    from: envelope.sender.clone(),
                    uuid: envelope.uuid.clone(),
                    payload,
                    received_at: Utc::now(),
                });
                if delivered {
                    self.node.stats.messages_delivered.inc();
                }
            }
        }
    }

    async fn answer_about(&self, requester: &str, request: AboutRequest) {
        let response = AboutResponse::new(request.id, self.node.announcement().await);
        let body = match serde_json::to_vec(&response) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode about response");
                return;
            }
        };
        if let Err(e) = self.send_msg(requester, &body).await {
            tracing::debug!(to = %requester, error = %e, "cannot answer about probe");
        }
    }

    /// Replay the tail of our own durable log through the inbound path.
    pub async fn drain_durable_log(&self) -> Result<(), CoordError> {
        let log_id = self.node.state.lock().await.self_record.durable_log_id.clone();
        let entries = self.node.log.tail(&log_id, DURABLE_TAIL_LEN).await?;
        for entry in entries {
            self.handle_private_entry(&entry, EntrySource::DurableLog).await;
        }
        Ok(())
    }

    pub fn pending_retries(&self) -> usize {
        lock(&self.retries).len()
    }

    /// Abort every outstanding retry task.
    pub fn cancel_all(&self) {
        let tasks: Vec<RetryTask> = lock(&self.retries).drain().map(|(_, t)| t).collect();
        for handle in tasks.into_iter().filter_map(|t| t.handle) {
            handle.abort();
        }
        lock(&self.about).clear();
    }
}
