/// Integration tests: encrypted private messaging between full runtimes.
///
/// Covers delivery over the private topic and the durable log, ACK-driven
/// retry cancellation, retry exhaustion and the "about" probe.
use std::time::Duration;

use coord_protocol::{
    CoordConfig, CoordError, CoordEvent, CoordNodeBuilder, MemoryHub, MemoryLog, RuntimeChannels,
    SealedBoxCrypto,
};

async fn start(hub: &MemoryHub, log: &MemoryLog, id: &str) -> RuntimeChannels {
    CoordNodeBuilder::new(CoordConfig::default())
        .transport(hub.transport(id))
        .durable_log(log.clone())
        .crypto(SealedBoxCrypto::new())
        .start()
        .await
        .expect("node starts")
}

async fn wait_for_peer(node: &RuntimeChannels, peer: &str) {
    for _ in 0..200 {
        if node.handle.peer(peer).await.is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never learned about {peer}", node.handle.peer_id());
}

/// Two running nodes that know each other.
async fn pair(hub: &MemoryHub, log: &MemoryLog) -> (RuntimeChannels, RuntimeChannels) {
    let alice = start(hub, log, "QmAlice").await;
    let bob = start(hub, log, "QmBob").await;
    wait_for_peer(&alice, "QmBob").await;
    alice.handle.announce().await.unwrap();
    wait_for_peer(&bob, "QmAlice").await;
    (alice, bob)
}

#[tokio::test]
async fn message_delivered_once_and_acknowledged() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let (alice, mut bob) = pair(&hub, &log).await;

    let pending = alice.handle.send("QmBob", b"hello bob").await.unwrap();
    let uuid = pending.uuid.clone();
    assert!(pending.acknowledged(Duration::from_secs(2)).await);

    let delivered = tokio::time::timeout(Duration::from_secs(2), bob.messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.from, "QmAlice");
    assert_eq!(delivered.uuid, uuid);
    assert_eq!(delivered.payload, b"hello bob");

    // The copy mirrored into Bob's durable log arrives too and is dropped.
    for _ in 0..200 {
        if bob.handle.stats().duplicates_dropped.get() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let bob_stats = bob.handle.stats();
    assert_eq!(bob_stats.duplicates_dropped.get(), 1);
    assert_eq!(bob_stats.messages_delivered.get(), 1);
    assert_eq!(bob_stats.acks_sent.get(), 1, "the replayed log copy is not acknowledged again");
    assert!(bob.messages.try_recv().is_err());

    let alice_stats = alice.handle.stats();
    assert_eq!(alice_stats.messages_sent.get(), 1);
    assert_eq!(alice_stats.durable_appends.get(), 1);
    assert_eq!(alice_stats.acks_received.get(), 1);
    assert_eq!(log.entries(&bob.handle.self_record().await.durable_log_id).len(), 1);

    alice.handle.shutdown();
    bob.handle.shutdown();
}

#[tokio::test]
async fn messages_flow_both_ways() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let (mut alice, mut bob) = pair(&hub, &log).await;

    let to_bob = alice.handle.send("QmBob", b"ping").await.unwrap();
    let to_alice = bob.handle.send("QmAlice", b"pong").await.unwrap();
    assert!(to_bob.acknowledged(Duration::from_secs(2)).await);
    assert!(to_alice.acknowledged(Duration::from_secs(2)).await);

    assert_eq!(bob.messages.recv().await.unwrap().payload, b"ping");
    assert_eq!(alice.messages.recv().await.unwrap().payload, b"pong");

    alice.handle.shutdown();
    bob.handle.shutdown();
}

#[tokio::test]
async fn unknown_receiver_is_rejected_before_sending() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let alice = start(&hub, &log, "QmAlice").await;
    let published_before = hub.published().len();

    let err = alice.handle.send("QmNobody", b"hi").await.unwrap_err();
    assert!(matches!(err, CoordError::UnknownPeer { ref peer_id } if peer_id == "QmNobody"), "{err:?}");
    assert_eq!(hub.published().len(), published_before);

    alice.handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn silent_receiver_gets_exactly_three_retries() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let (mut alice, bob) = pair(&hub, &log).await;
    bob.handle.shutdown();

    let pending = alice.handle.send("QmBob", b"anyone there?").await.unwrap();
    let uuid = pending.uuid.clone();
    assert!(!pending.acknowledged(Duration::from_secs(30)).await);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let copies = hub
        .published_on("QmBob")
        .into_iter()
        .filter(|p| p.from == "QmAlice")
        .count();
    assert_eq!(copies, 4, "one publish plus three retries");

    let stats = alice.handle.stats();
    assert_eq!(stats.retries.get(), 3);
    assert_eq!(stats.retries_exhausted.get(), 1);

    let mut abandoned = false;
    while let Ok(event) = alice.events.try_recv() {
        if event == (CoordEvent::MessageAbandoned { uuid: uuid.clone(), receiver: "QmBob".into() }) {
            abandoned = true;
        }
    }
    assert!(abandoned);

    alice.handle.shutdown();
}

#[tokio::test]
async fn about_probe_returns_peer_announcement() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let (alice, bob) = pair(&hub, &log).await;

    let response = alice
        .handle
        .query_about("QmBob", Duration::from_secs(2))
        .await
        .unwrap()
        .expect("bob answers");
    assert!(response.id.starts_with("metrics"));
    assert_eq!(response.result.method, "about");
    assert_eq!(response.result.value.node_id, "QmBob");
    assert_eq!(
        response.result.value.encrypt_pub_key,
        Some(bob.handle.self_record().await.public_key)
    );
    assert_eq!(alice.handle.stats().probes_sent.get(), 1);

    alice.handle.shutdown();
    bob.handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn about_probe_times_out_when_peer_is_down() {
    let hub = MemoryHub::new();
    let log = MemoryLog::new();
    let (alice, bob) = pair(&hub, &log).await;
    bob.handle.shutdown();

    let response = alice
        .handle
        .query_about("QmBob", Duration::from_secs(3))
        .await
        .unwrap();
    assert!(response.is_none());
    assert_eq!(alice.handle.stats().probes_timed_out.get(), 1);

    alice.handle.shutdown();
}
