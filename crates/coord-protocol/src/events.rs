use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::types::PeerId;

/// An application message received privately (decrypted).
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    pub from: PeerId,
    pub uuid: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Protocol-level events the application may want to observe.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordEvent {
    /// First announcement from a peer.
    PeerDiscovered { peer_id: PeerId },
    /// A known peer re-announced itself.
    PeerUpdated { peer_id: PeerId },
    /// A relay-capable peer joined the relay list.
    RelayPromoted { peer_id: PeerId, dial_addr: String },
    MessageAcked { uuid: String },
    /// Retries exhausted without an ACK.
    MessageAbandoned { uuid: String, receiver: PeerId },
    /// The durable log was rotated to a new handle.
    DurableLogRotated { log_id: String },
    /// A maintenance task failed or panicked; the scheduler carries on.
    TaskFailed { task: String, description: String },
}

/// Where delivered messages and events go. Senders are optional so
/// components can run detached in tests.
#[derive(Debug, Clone, Default)]
pub struct Outlets {
    messages: Option<mpsc::Sender<DeliveredMessage>>,
    events: Option<mpsc::Sender<CoordEvent>>,
}

impl Outlets {
    pub fn new(
        messages: mpsc::Sender<DeliveredMessage>,
        events: mpsc::Sender<CoordEvent>,
    ) -> Self {
        Self {
            messages: Some(messages),
            events: Some(events),
        }
    }

    /// No receivers: everything is discarded.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: CoordEvent) {
        if let Some(tx) = &self.events {
            if tx.try_send(event).is_err() {
                tracing::trace!("event channel full or closed, dropping event");
            }
        }
    }

    /// Hand a message to the application. `false` if it could not be queued.
    pub fn deliver(&self, message: DeliveredMessage) -> bool {
        match &self.messages {
            Some(tx) => match tx.try_send(message) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "application message channel rejected delivery");
                    false
                }
            },
            None => false,
        }
    }
}
