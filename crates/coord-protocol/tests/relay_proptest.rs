use std::collections::HashSet;

use coord_protocol::{remove_duplicates, sort_relays, LatencyRing, RelayRecord};
use proptest::prelude::*;

/// (id index, addr index, bootstrap?, latency samples)
fn relay_strategy() -> impl Strategy<Value = (u8, u8, bool, Vec<u64>)> {
    (
        0..6u8,
        0..6u8,
        any::<bool>(),
        prop::collection::vec(0..20_000u64, 0..15),
    )
}

fn build(relays: &[(u8, u8, bool, Vec<u64>)]) -> Vec<RelayRecord> {
    relays
        .iter()
        .map(|(id, addr, bootstrap, samples)| {
            let peer = format!("QmRelay{id}");
            let dial = format!("/ip4/10.0.0.{addr}/tcp/4001/p2p/{peer}");
            let mut record = if *bootstrap {
                RelayRecord::bootstrap(peer, dial, true)
            } else {
                RelayRecord::promoted(peer, dial)
            };
            record.metrics = LatencyRing::from_samples(samples.iter().copied());
            record
        })
        .collect()
}

/// Sentinel for bootstrap or unmeasured relays, else the mean of the last ten samples.
fn expected_score(bootstrap: bool, samples: &[u64]) -> f64 {
    if bootstrap || samples.is_empty() {
        return 10_000.0;
    }
    let recent = &samples[samples.len().saturating_sub(10)..];
    recent.iter().sum::<u64>() as f64 / recent.len() as f64
}

proptest! {
    #[test]
    fn score_is_sentinel_or_recent_mean(relay in relay_strategy()) {
        let expected = expected_score(relay.2, &relay.3);
        let record = build(std::slice::from_ref(&relay)).remove(0);
        prop_assert!((record.score() - expected).abs() < 1e-9, "{} != {}", record.score(), expected);
    }

    /// Sorting yields non-decreasing scores and keeps every record.
    #[test]
    fn sort_orders_by_score(relays in prop::collection::vec(relay_strategy(), 0..20)) {
        let mut relays = build(&relays);
        let before = relays.len();
        sort_relays(&mut relays);
        prop_assert_eq!(relays.len(), before);
        for pair in relays.windows(2) {
            prop_assert!(pair[0].score() <= pair[1].score());
        }
    }

    /// The sorted scores are exactly the independently computed ones, ascending.
    #[test]
    fn sorted_scores_match_expected(inputs in prop::collection::vec(relay_strategy(), 0..20)) {
        let mut expected: Vec<f64> = inputs.iter().map(|r| expected_score(r.2, &r.3)).collect();
        expected.sort_by(f64::total_cmp);
        let mut relays = build(&inputs);
        sort_relays(&mut relays);
        for (record, want) in relays.iter().zip(&expected) {
            prop_assert!((record.score() - want).abs() < 1e-9);
        }
    }

    /// Bootstrap relays never outrank a measured dynamic relay under the sentinel.
    #[test]
    fn bootstrap_sorts_after_fast_dynamic(samples in prop::collection::vec(0..9_999u64, 1..10)) {
        let mut relays = build(&[(0, 0, true, vec![]), (1, 1, false, samples)]);
        sort_relays(&mut relays);
        prop_assert!(!relays[0].is_bootstrap);
        prop_assert!(relays[1].is_bootstrap);
    }

    /// After dedup no peer id or dial address appears twice, and the first
    /// occurrence of each survivor is the one kept.
    #[test]
    fn dedup_leaves_unique_ids_and_addrs(relays in prop::collection::vec(relay_strategy(), 0..20)) {
        let original = build(&relays);
        let mut relays = original.clone();
        prop_assert!(remove_duplicates(&mut relays));

        let ids: HashSet<_> = relays.iter().map(|r| r.peer_id.clone()).collect();
        let addrs: HashSet<_> = relays.iter().map(|r| r.dial_addr.clone()).collect();
        prop_assert_eq!(ids.len(), relays.len());
        prop_assert_eq!(addrs.len(), relays.len());
        if let Some(first) = original.first() {
            prop_assert_eq!(&relays[0], first);
        }
    }

    /// The ring keeps the last ten samples and averages exactly those.
    #[test]
    fn latency_ring_averages_last_ten(samples in prop::collection::vec(0..50_000u64, 1..40)) {
        let ring = LatencyRing::from_samples(samples.iter().copied());
        let tail: Vec<u64> = samples.iter().rev().take(10).rev().copied().collect();
        prop_assert_eq!(ring.len(), tail.len());
        prop_assert_eq!(ring.samples().collect::<Vec<_>>(), tail.clone());
        let expected = tail.iter().sum::<u64>() as f64 / tail.len() as f64;
        prop_assert!((ring.mean().unwrap() - expected).abs() < 1e-9);
    }
}
