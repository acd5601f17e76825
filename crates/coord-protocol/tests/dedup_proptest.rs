use coord_protocol::DedupCache;
use proptest::prelude::*;

proptest! {
    /// The cache never holds more than its capacity.
    #[test]
    fn bounded_by_capacity(
        capacity in 1..50usize,
        hashes in prop::collection::vec("[a-f0-9]{1,4}", 0..200),
    ) {
        let mut cache = DedupCache::new(capacity);
        for h in &hashes {
            cache.insert(h);
            prop_assert!(cache.len() <= capacity);
        }
    }

    /// A hash inserted and followed by fewer than `capacity` distinct others
    /// is still reported as a duplicate.
    #[test]
    fn recent_hash_is_duplicate(
        capacity in 2..40usize,
        others in prop::collection::hash_set("[g-z]{3}", 0..39),
    ) {
        let mut cache = DedupCache::new(capacity);
        prop_assert!(cache.insert("target"));
        for other in others.iter().take(capacity - 1) {
            cache.insert(other);
        }
        prop_assert!(!cache.insert("target"));
    }

    /// Once `capacity` newer distinct hashes arrive the oldest is forgotten.
    #[test]
    fn oldest_evicted_first(capacity in 1..40usize) {
        let mut cache = DedupCache::new(capacity);
        cache.insert("first");
        for i in 0..capacity {
            cache.insert(&format!("h{i}"));
        }
        prop_assert!(!cache.contains("first"));
        prop_assert!(cache.insert("first"));
    }
}
