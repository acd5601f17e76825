use coord_metrics::{Counter, Gauge};
use serde::Serialize;

/// Per-node protocol statistics.
///
/// Shared behind an `Arc` by every component; `clone()` gives a snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordStats {
    pub announcements_sent: Counter,
    pub announcements_received: Counter,
    pub announcements_rejected: Counter,
    pub messages_sent: Counter,
    pub messages_delivered: Counter,
    /// Republishes of unacknowledged messages.
    pub retries: Counter,
    /// Messages abandoned after the last retry.
    pub retries_exhausted: Counter,
    pub acks_sent: Counter,
    pub acks_received: Counter,
    pub duplicates_dropped: Counter,
    pub decrypt_failures: Counter,
    pub probes_sent: Counter,
    pub probes_timed_out: Counter,
    pub durable_appends: Counter,
    pub peers_known: Gauge,
    pub relays_known: Gauge,
    pub relays_connected: Gauge,
}
