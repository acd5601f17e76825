/// Integration tests: announcement-driven discovery between full runtimes
/// on an in-memory hub.
use std::time::Duration;

use coord_protocol::{
    Announcement, CoordConfig, CoordEvent, CoordNodeBuilder, MemoryHub, MemoryLog,
    RuntimeChannels, SealedBoxCrypto, SelfRecord, Transport,
};
use coord_protocol::types::DEFAULT_COORDINATION_TOPIC;

async fn start(hub: &MemoryHub, log: &MemoryLog, id: &str, config: CoordConfig) -> RuntimeChannels {
    CoordNodeBuilder::new(config)
        .transport(hub.transport(id))
        .durable_log(log.clone())
        .crypto(SealedBoxCrypto::new())
        .start()
        .await
        .expect("node starts")
}

/// Poll until `peer` shows up in `node`'s registry.
async fn wait_for_peer(node: &RuntimeChannels, peer: &str) -> coord_protocol::PeerRecord {
    for _ in 0..200 {
        if let Some(record) = node.handle.peer(peer).await {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never learned about {peer}", node.handle.peer_id());
}

async fn next_event(node: &mut RuntimeChannels) -> CoordEvent {
    tokio::time::timeout(Duration::from_secs(2), node.events.recv())
        .await
        .expect("event in time")
        .expect("event channel open")
}

#[tokio::test]
async fn nodes_learn_each_other_from_announcements() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let a = start(&hub, &log, "QmAlice", CoordConfig::default()).await;
    let mut b = start(&hub, &log, "QmBob", CoordConfig::default()).await;

    // Alice was already listening when Bob announced on startup.
    let bob_at_alice = wait_for_peer(&a, "QmBob").await;
    assert_eq!(bob_at_alice.data.node_id, "QmBob");
    assert_eq!(bob_at_alice.data.dial_addrs, vec![hub.addr_of("QmBob").unwrap()]);

    // Bob only hears Alice once she announces again.
    assert!(b.handle.peer("QmAlice").await.is_none());
    a.handle.announce().await.unwrap();
    let alice_at_bob = wait_for_peer(&b, "QmAlice").await;

    let alice_self = a.handle.self_record().await;
    assert_eq!(alice_at_bob.data.encrypt_pub_key.as_deref(), Some(alice_self.public_key.as_str()));
    assert_eq!(alice_at_bob.data.durable_log_id.as_deref(), Some(alice_self.durable_log_id.as_str()));
    assert!(alice_at_bob.data.broadcasted_at.is_some());
    assert!(coord_protocol::is_fresh_peer(&alice_at_bob));

    // Learning a peer joins its private topic.
    assert!(hub.subscribers("QmAlice").contains(&"QmBob".to_string()));
    assert_eq!(
        next_event(&mut b).await,
        CoordEvent::PeerDiscovered { peer_id: "QmAlice".into() }
    );
    assert_eq!(b.handle.stats().peers_known.get(), 1);

    a.handle.shutdown();
    b.handle.shutdown();
}

#[tokio::test]
async fn reannouncement_replaces_record() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let mut a = start(&hub, &log, "QmAlice", CoordConfig::default()).await;
    let b = start(&hub, &log, "QmBob", CoordConfig::default()).await;
    let first = wait_for_peer(&a, "QmBob").await;
    assert_eq!(
        next_event(&mut a).await,
        CoordEvent::PeerDiscovered { peer_id: "QmBob".into() }
    );

    let rotated = b.handle.rotate_durable_log().await.unwrap();
    b.handle.announce().await.unwrap();
    assert_eq!(
        next_event(&mut a).await,
        CoordEvent::PeerUpdated { peer_id: "QmBob".into() }
    );

    let peers = a.handle.peers().await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].data.durable_log_id.as_deref(), Some(rotated.as_str()));
    assert_ne!(peers[0].data.durable_log_id, first.data.durable_log_id);
    assert!(peers[0].last_seen_at >= first.last_seen_at);

    a.handle.shutdown();
    b.handle.shutdown();
}

#[tokio::test]
async fn invalid_broadcasts_are_ignored() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let node = start(&hub, &log, "QmAlice", CoordConfig::default()).await;

    let eve = hub.transport("QmEve");
    let mallory = hub.transport("QmMallory");
    let topic = DEFAULT_COORDINATION_TOPIC;

    let identity = SealedBoxCrypto::identity_from_seed([7; 32]);
    let record = SelfRecord::new(
        &CoordConfig::default(),
        "QmEve".into(),
        vec![hub.addr_of("QmEve").unwrap()],
        &identity,
        "/log/QmEve/0".into(),
    );
    let valid = Announcement::from_self(&record);

    let mut foreign = valid.clone();
    foreign.api_name = "someone-else".into();

    eve.publish(topic, b"not json".to_vec()).await.unwrap();
    eve.publish(topic, foreign.to_bytes().unwrap()).await.unwrap();
    // Mallory relays Eve's announcement as if it were its own.
    mallory.publish(topic, valid.to_bytes().unwrap()).await.unwrap();
    eve.publish(topic, valid.to_bytes().unwrap()).await.unwrap();

    let stored = wait_for_peer(&node, "QmEve").await;
    assert_eq!(stored.data, valid);
    let peers = node.handle.peers().await;
    assert_eq!(peers.len(), 1, "only the genuine announcement is stored");
    assert_eq!(node.handle.stats().announcements_received.get(), 1);

    node.handle.shutdown();
}

#[tokio::test]
async fn custom_topic_isolates_networks() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let a = start(&hub, &log, "QmAlice", CoordConfig::default().topic("net-a")).await;
    let b = start(&hub, &log, "QmBob", CoordConfig::default().topic("net-b")).await;
    let c = start(&hub, &log, "QmCarol", CoordConfig::default().topic("net-a")).await;

    wait_for_peer(&a, "QmCarol").await;
    b.handle.announce().await.unwrap();
    c.handle.announce().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.handle.peer("QmBob").await.is_none());
    assert!(b.handle.peers().await.is_empty());
    assert_eq!(hub.published_on("net-b").len(), 2);

    for node in [a, b, c] {
        node.handle.shutdown();
    }
}
