use bytes::Bytes;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use futures::stream::{self, StreamExt, TryStreamExt};
use relaysync::message::sign;
use relaysync::store::MessageStore;
use relaysync::transfer::{ContentStream, TransferState};
use relaysync::{
    Message, Node, NodeConfig, PushOutcome, RateLimitConfig, RelayDecision, RelayService,
    StoreService, TransferError,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(node_id: &str) -> NodeConfig {
    NodeConfig {
        node_id: node_id.to_string(),
        max_hops: 3,
        max_message_size: 1024 * 1024,
        pull_chunk_size: 16,
        rate_limit: RateLimitConfig::disabled(),
        local_recipients: vec!["bob".to_string()],
        ..Default::default()
    }
}

async fn node_with(config: NodeConfig) -> Node {
    let store = Arc::new(MessageStore::new_in_memory().await.unwrap());
    Node::builder(config).store(store).build().await.unwrap()
}

async fn node() -> Node {
    node_with(config("relay-1")).await
}

fn signed(id: &str, content: &[u8]) -> Message {
    let mut msg = Message::new(id, "bob", content, Duration::from_secs(3600));
    sign(&mut msg, &SigningKey::from_bytes(&[42u8; 32]));
    msg
}

fn content(parts: &[&[u8]]) -> ContentStream {
    let items: Vec<io::Result<Bytes>> = parts
        .iter()
        .map(|p| Ok(Bytes::copy_from_slice(p)))
        .collect();
    stream::iter(items).boxed()
}

async fn diff(node: &Node, batches: Vec<Vec<&str>>) -> Vec<Vec<bool>> {
    let batches: Vec<Vec<String>> = batches
        .into_iter()
        .map(|b| b.into_iter().map(String::from).collect())
        .collect();
    node.diff(stream::iter(batches).boxed())
        .try_collect()
        .await
        .unwrap()
}

/// Interrupted pushes report exactly the bytes that were made durable
#[tokio::test]
async fn test_resume_offset_accounting() {
    println!("\n=== Testing ResumeOffset Accounting ===\n");

    let node = node().await;
    let body: Vec<u8> = (0..100u8).collect();
    let msg = signed("msg-1", &body);

    assert_eq!(node.resume_offset(&msg).await.unwrap(), 0);

    let outcome = node
        .push("peer-a", msg.clone(), 0, content(&[&body[..30], &body[30..64]]))
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Incomplete { offset: 64 });
    assert_eq!(node.resume_offset(&msg).await.unwrap(), 64);
    println!("✓ Resume offset after 64 bytes: 64");

    let outcome = node
        .push("peer-a", msg.clone(), 64, content(&[&body[64..]]))
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Stored(RelayDecision::Deliver));
    assert_eq!(node.resume_offset(&msg).await.unwrap(), 100);

    let (_, data) = node.pull("msg-1", 0).await.unwrap().collect().await.unwrap();
    assert_eq!(data, body);
    println!("✓ Resumed push stored all 100 bytes");
}

/// A push at the wrong offset is refused and changes nothing
#[tokio::test]
async fn test_incorrect_offset_leaves_offset_unchanged() {
    let node = node().await;
    let msg = signed("msg-1", b"0123456789");

    node.push("peer-a", msg.clone(), 0, content(&[b"0123"]))
        .await
        .unwrap();

    for wrong in [0u64, 2, 6, 10] {
        let err = node
            .push("peer-a", msg.clone(), wrong, content(&[b"456789"]))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::IncorrectOffset {
                expected: 4,
                actual: wrong
            }
        );
        assert_eq!(node.resume_offset(&msg).await.unwrap(), 4);
    }

    assert_eq!(
        node.state("msg-1").await.unwrap(),
        TransferState::Receiving { offset: 4 }
    );
}

/// Two concurrent pushes of one id: exactly one is refused with Busy
#[tokio::test]
async fn test_concurrent_push_exactly_one_busy() {
    // Tight limits show Busy is reported before any rate limit is consulted
    let mut cfg = config("relay-1");
    cfg.rate_limit = RateLimitConfig {
        enabled: true,
        per_peer_per_minute: 1,
        per_recipient_per_minute: 1,
        burst: 1,
    };
    let node = Arc::new(node_with(cfg).await);
    let msg = signed("msg-1", b"slow upload");

    let (tx, rx) = futures::channel::mpsc::unbounded::<io::Result<Bytes>>();
    tx.unbounded_send(Ok(Bytes::from_static(b"slow "))).unwrap();

    let first = {
        let node = Arc::clone(&node);
        let msg = msg.clone();
        tokio::spawn(async move { node.push("peer-a", msg, 0, rx.boxed()).await })
    };
    while !node.transfers().leases().is_leased("msg-1") {
        tokio::task::yield_now().await;
    }

    let second = node
        .push("peer-b", msg.clone(), 0, content(&[b"slow upload"]))
        .await;
    let err = second.unwrap_err();
    assert!(matches!(err, TransferError::Busy { .. }));
    assert!(err.retry_after().unwrap() <= Duration::from_secs(1));

    tx.unbounded_send(Ok(Bytes::from_static(b"upload"))).unwrap();
    drop(tx);
    let outcome = first.await.unwrap().unwrap();
    assert!(outcome.is_stored());
}

/// A corrupted push is rejected, discarded, and not advertised by Diff
#[tokio::test]
async fn test_content_mismatch_then_diff_false() {
    let node = node().await;
    let msg = signed("msg-1", b"genuine content");

    let err = node
        .push("peer-a", msg.clone(), 0, content(&[b"tampered conten"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::ContentMismatch { .. }));

    assert_eq!(diff(&node, vec![vec!["msg-1"]]).await, vec![vec![false]]);
    assert_eq!(node.resume_offset(&msg).await.unwrap(), 0);
    assert_eq!(node.state("msg-1").await.unwrap(), TransferState::Absent);
}

/// Diff answers keep request order and batch boundaries
#[tokio::test]
async fn test_diff_order_preserving() {
    let node = node().await;
    for id in ["b", "d", "e"] {
        node.originate(signed(id, id.as_bytes()), id.as_bytes())
            .await
            .unwrap();
    }

    let answers = diff(
        &node,
        vec![vec!["e", "a", "b"], vec!["c"], vec!["d", "e", "f", "b"]],
    )
    .await;
    assert_eq!(
        answers,
        vec![
            vec![true, false, true],
            vec![false],
            vec![true, true, false, true]
        ]
    );
}

/// Expired messages vanish from Diff, Manifest and Pull before any sweep
#[tokio::test]
async fn test_expiry_exclusion() {
    let node = node().await;

    let fresh = signed("fresh", b"fresh");
    node.originate(fresh.clone(), b"fresh").await.unwrap();

    let mut stale = Message::new("stale", "bob", b"stale", Duration::from_secs(5));
    stale.creation_time = Utc::now() - chrono::Duration::seconds(60);
    node.store().put(&stale, b"stale").await.unwrap();

    assert_eq!(
        diff(&node, vec![vec!["fresh", "stale"]]).await,
        vec![vec![true, false]]
    );

    let manifest: Vec<Message> = node.manifest().try_collect().await.unwrap();
    assert_eq!(manifest, vec![fresh]);

    assert!(matches!(
        node.pull("stale", 0).await.unwrap_err(),
        TransferError::Expired(_)
    ));

    // Pushing an expired message is refused outright
    let mut late = signed("late", b"late");
    late.creation_time = Utc::now() - chrono::Duration::hours(2);
    sign(&mut late, &SigningKey::from_bytes(&[42u8; 32]));
    assert!(matches!(
        node.push("peer-a", late, 0, content(&[b"late"])).await,
        Err(TransferError::Expired(_))
    ));

    let report = node.maintenance_cycle().await.unwrap();
    assert_eq!(report.expired, vec!["stale".to_string()]);
}

/// A message stored while fresh is refused as Expired once its lifespan ends
#[tokio::test]
async fn test_stored_message_repushed_after_expiry() {
    let node = node().await;

    let mut msg = Message::new("short", "bob", b"short-lived", Duration::from_millis(200));
    sign(&mut msg, &SigningKey::from_bytes(&[42u8; 32]));
    node.originate(msg.clone(), b"short-lived").await.unwrap();
    assert_eq!(diff(&node, vec![vec!["short"]]).await, vec![vec![true]]);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = node
        .push("peer-a", msg.clone(), 0, content(&[b"short-lived"]))
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::Expired("short".into()));
    assert!(matches!(
        node.pull("short", 0).await.unwrap_err(),
        TransferError::Expired(_)
    ));
    assert_eq!(diff(&node, vec![vec!["short"]]).await, vec![vec![false]]);
}

/// A stalled pusher loses its lease after the idle timeout and another
/// connection resumes where the durable bytes end
#[tokio::test]
async fn test_idle_lease_reclaimed_by_resuming_peer() {
    println!("\n=== Testing Idle Lease Reclaim ===\n");

    let mut cfg = config("relay-1");
    cfg.lease_idle_timeout = Duration::from_millis(50);
    let node = Arc::new(node_with(cfg).await);
    let body: Vec<u8> = (0..40u8).collect();
    let msg = signed("msg-1", &body);

    let (tx, rx) = futures::channel::mpsc::unbounded::<io::Result<Bytes>>();
    tx.unbounded_send(Ok(Bytes::copy_from_slice(&body[..16])))
        .unwrap();
    let stalled = {
        let node = Arc::clone(&node);
        let msg = msg.clone();
        tokio::spawn(async move { node.push("peer-a", msg, 0, rx.boxed()).await })
    };
    while node.resume_offset(&msg).await.unwrap() < 16 {
        tokio::task::yield_now().await;
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    let report = node.maintenance_cycle().await.unwrap();
    assert_eq!(report.reaped_leases, vec!["msg-1".to_string()]);
    println!("✓ Idle lease reaped at offset 16");

    tx.unbounded_send(Ok(Bytes::copy_from_slice(&body[16..])))
        .unwrap();
    let err = stalled.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::Interrupted(_)));
    assert!(err.is_retryable());

    let offset = node.resume_offset(&msg).await.unwrap();
    assert_eq!(offset, 16);
    let outcome = node
        .push("peer-b", msg.clone(), offset, content(&[&body[16..]]))
        .await
        .unwrap();
    assert_eq!(outcome, PushOutcome::Stored(RelayDecision::Deliver));

    let (_, data) = node.pull("msg-1", 0).await.unwrap().collect().await.unwrap();
    assert_eq!(data, body);
    println!("✓ Second connection resumed and stored all 40 bytes");
}

/// Messages that have travelled too far are rejected
#[tokio::test]
async fn test_too_many_hops() {
    let node = node().await;

    let mut msg = signed("msg-1", b"far");
    msg.hops = vec!["r1".into(), "r2".into(), "r3".into()];
    assert!(node
        .push("peer-a", msg.clone(), 0, content(&[b"far"]))
        .await
        .unwrap()
        .is_stored());

    let mut msg = signed("msg-2", b"too far");
    msg.hops = vec!["r1".into(), "r2".into(), "r3".into(), "r4".into()];
    let err = node
        .push("peer-a", msg.clone(), 0, content(&[b"too far"]))
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::TooManyHops { hops: 4, max: 3 });
    assert_eq!(diff(&node, vec![vec!["msg-2"]]).await, vec![vec![false]]);
}

/// Resumed pushes may not rewrite the hop history of the partial
#[tokio::test]
async fn test_hops_prefix_enforced_on_resume() {
    let node = node().await;

    let mut msg = signed("msg-1", b"routed");
    msg.hops = vec!["r1".into(), "r2".into()];
    node.push("peer-a", msg.clone(), 0, content(&[b"rou"]))
        .await
        .unwrap();

    let mut rewritten = msg.clone();
    rewritten.hops = vec!["r2".into(), "r1".into()];
    let err = node
        .push("peer-b", rewritten, 3, content(&[b"ted"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidHops(_)));
    assert_eq!(node.resume_offset(&msg).await.unwrap(), 0);
}

/// Pull is read-only and repeatable at offset zero and at the end
#[tokio::test]
async fn test_pull_idempotent() {
    let node = node().await;
    let body = vec![7u8; 50];
    let msg = signed("msg-1", &body);
    node.originate(msg.clone(), &body).await.unwrap();

    for _ in 0..3 {
        let (meta, data) = node.pull("msg-1", 0).await.unwrap().collect().await.unwrap();
        assert_eq!(meta, msg);
        assert_eq!(data, body);
    }

    for _ in 0..2 {
        let response = node.pull("msg-1", 50).await.unwrap();
        assert_eq!(response.meta, msg);
        let chunks: Vec<Bytes> = response.content.try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }

    // Chunked at the configured pull size
    let chunks: Vec<Bytes> = node
        .pull("msg-1", 0)
        .await
        .unwrap()
        .content
        .try_collect()
        .await
        .unwrap();
    assert_eq!(
        chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
        vec![16, 16, 16, 2]
    );

    assert!(matches!(
        node.pull("msg-1", 51).await.unwrap_err(),
        TransferError::OffsetOutOfRange { .. }
    ));
}

/// Re-pushing a stored id: same content is benign, different content collides
#[tokio::test]
async fn test_already_seen_and_collision() {
    let node = node().await;
    let msg = signed("msg-1", b"original");
    node.push("peer-a", msg.clone(), 0, content(&[b"original"]))
        .await
        .unwrap();

    let err = node
        .push("peer-b", msg.clone(), 0, content(&[b"original"]))
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::AlreadySeen("msg-1".into()));
    assert!(!err.is_retryable());

    let imposter = signed("msg-1", b"imposter");
    let err = node
        .push("peer-b", imposter, 0, content(&[b"imposter"]))
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::MessageIdCollision("msg-1".into()));

    let (_, data) = node.pull("msg-1", 0).await.unwrap().collect().await.unwrap();
    assert_eq!(data, b"original");
}

/// Signatures must cover the metadata that was presented
#[tokio::test]
async fn test_invalid_signature_rejected() {
    let node = node().await;

    let mut msg = signed("msg-1", b"signed");
    msg.recipient = "mallory".into();
    let err = node
        .push("peer-a", msg, 0, content(&[b"signed"]))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InvalidSignature { .. }));

    let unsigned = Message::new("msg-2", "bob", b"anon", Duration::from_secs(60));
    assert!(matches!(
        node.originate(unsigned, b"anon").await,
        Err(TransferError::InvalidSignature { .. })
    ));
}

/// Partial content survives a restart of a file-backed node
#[tokio::test]
async fn test_partial_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("relay.db");
    let mut cfg = config("relay-1");
    cfg.database_url = format!("sqlite://{}", db_path.display());

    let msg = signed("msg-1", b"persistent payload");
    {
        let node = Node::builder(cfg.clone()).build().await.unwrap();
        let outcome = node
            .push("peer-a", msg.clone(), 0, content(&[b"persistent"]))
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Incomplete { offset: 10 });
        node.store().close().await;
    }

    let node = Node::builder(cfg).build().await.unwrap();
    assert_eq!(node.resume_offset(&msg).await.unwrap(), 10);
    let outcome = node
        .push("peer-b", msg.clone(), 10, content(&[b" payload"]))
        .await
        .unwrap();
    assert!(outcome.is_stored());
    println!("✓ Partial upload resumed after restart");
}
