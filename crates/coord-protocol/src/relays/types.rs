//! Relay records and the pure ranking helpers over them.
//!
//! Score = arithmetic mean of the last [`LATENCY_RING_CAPACITY`] probe
//! round-trips. Bootstrap relays and relays never measured score
//! [`SENTINEL_LATENCY_MS`] so promoted, measured relays sort ahead of them.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{PeerId, LATENCY_RING_CAPACITY, SENTINEL_LATENCY_MS};

/// Fixed-size FIFO of latency samples (ms).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyRing {
    samples: VecDeque<u64>,
}

impl LatencyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: impl IntoIterator<Item = u64>) -> Self {
        let mut ring = Self::new();
        for s in samples {
            ring.push(s);
        }
        ring
    }

    pub fn push(&mut self, sample_ms: u64) {
        if self.samples.len() == LATENCY_RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayRecord {
    pub peer_id: PeerId,
    pub dial_addr: String,
    pub connected: bool,
    pub is_bootstrap: bool,
    pub updated_at: DateTime<Utc>,
    pub metrics: LatencyRing,
}

impl RelayRecord {
    /// Seeded from static configuration.
    pub fn bootstrap(peer_id: PeerId, dial_addr: String, connected: bool) -> Self {
        Self {
            peer_id,
            dial_addr,
            connected,
            is_bootstrap: true,
            updated_at: Utc::now(),
            metrics: LatencyRing::new(),
        }
    }

    /// Promoted from a relay-capable peer after a successful dial.
    pub fn promoted(peer_id: PeerId, dial_addr: String) -> Self {
        Self {
            peer_id,
            dial_addr,
            connected: true,
            is_bootstrap: false,
            updated_at: Utc::now(),
            metrics: LatencyRing::new(),
        }
    }

    pub fn score(&self) -> f64 {
        if self.is_bootstrap {
            return SENTINEL_LATENCY_MS as f64;
        }
        self.metrics.mean().unwrap_or(SENTINEL_LATENCY_MS as f64)
    }
}

/// Order relays best (lowest score) first. Stable.
pub fn sort_relays(relays: &mut [RelayRecord]) {
    relays.sort_by(|a, b| a.score().total_cmp(&b.score()));
}

/// Keep the first record per peer id and per dial address.
pub fn remove_duplicates(relays: &mut Vec<RelayRecord>) -> bool {
    let mut ids = HashSet::new();
    let mut addrs = HashSet::new();
    relays.retain(|r| {
        let new_id = !ids.contains(&r.peer_id);
        let new_addr = !addrs.contains(&r.dial_addr);
        if new_id && new_addr {
            ids.insert(r.peer_id.clone());
            addrs.insert(r.dial_addr.clone());
            true
        } else {
            false
        }
    });
    true
}

/// Ordered relay list, looked up by peer id.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct RelayTable {
    records: Vec<RelayRecord>,
}

impl RelayTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer_id: &str) -> Option<&RelayRecord> {
        self.records.iter().find(|r| r.peer_id == peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut RelayRecord> {
        self.records.iter_mut().find(|r| r.peer_id == peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.get(peer_id).is_some()
    }

    /// Append unless a record for the same peer already exists.
    pub fn insert(&mut self, record: RelayRecord) -> bool {
        if self.contains(&record.peer_id) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sort(&mut self) {
        sort_relays(&mut self.records);
    }

    pub fn remove_duplicates(&mut self) -> bool {
        remove_duplicates(&mut self.records)
    }

    pub fn to_vec(&self) -> Vec<RelayRecord> {
        self.records.clone()
    }
}

impl From<Vec<RelayRecord>> for RelayTable {
    fn from(records: Vec<RelayRecord>) -> Self {
        Self { records }
    }
}
