/// Bounded FIFO set of recently handled content hashes.
///
/// Retries, the durable-log fallback and relay echoes all deliver the same
/// message more than once; every inbound entry is checked here before it is
/// acted on. When full, the oldest hash is evicted.
use std::collections::{HashSet, VecDeque};

use crate::types::DEFAULT_DEDUP_CAPACITY;

#[derive(Debug, Clone)]
pub struct DedupCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupCache {
    /// Capacity 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            capacity: cap,
        }
    }

    /// Record `hash`. Returns `true` if it was new, `false` for a duplicate.
    pub fn insert(&mut self, hash: &str) -> bool {
        if self.seen.contains(hash) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(hash.to_string());
        self.order.push_back(hash.to_string());
        true
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.seen.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
