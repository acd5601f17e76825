//! Statistics primitives for coordination nodes.
//!
//! [`Counter`] counts events that only ever go up (messages sent, retries,
//! duplicates dropped). [`Gauge`] holds a current level that moves both ways
//! (known peers, connected relays). Both serialize as a plain integer so a
//! stats struct built from them renders directly to JSON.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counter backed by [`AtomicU64`].
///
/// Relaxed ordering: values are statistics, never used for synchronisation.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.get()))
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

impl serde::Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

/// Point-in-time level (e.g. number of known peers).
///
/// Overwritten by [`Gauge::set`]; the last writer wins.
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.get()))
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gauge").field(&self.get()).finish()
    }
}

impl serde::Serialize for Gauge {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.inc();
        c.inc_by(4);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn counter_clone_is_independent() {
        let c = Counter::new();
        c.inc_by(7);
        let snapshot = c.clone();
        c.inc();
        assert_eq!(snapshot.get(), 7);
        assert_eq!(c.get(), 8);
    }

    #[test]
    fn gauge_last_write_wins() {
        let g = Gauge::default();
        g.set(12);
        g.set(3);
        assert_eq!(g.get(), 3);
    }

    #[test]
    fn serializes_as_plain_integers() {
        #[derive(serde::Serialize)]
        struct Stats {
            sent: Counter,
            peers: Gauge,
        }
        let stats = Stats {
            sent: Counter::new(),
            peers: Gauge::new(),
        };
        stats.sent.inc_by(2);
        stats.peers.set(9);
        let json = serde_json::to_string(&stats).unwrap();
        assert_eq!(json, r#"{"sent":2,"peers":9}"#);
    }
}
