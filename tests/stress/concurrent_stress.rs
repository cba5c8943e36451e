//! Concurrent transfer stress tests
//!
//! Many peers pushing distinct and identical message ids at once

use backoff::ExponentialBackoff;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use futures::stream::{self, StreamExt};
use relaysync::message::sign;
use relaysync::transfer::{with_backoff_config, ContentStream};
use relaysync::{
    ErrorClass, Message, Node, NodeConfig, PushOutcome, RateLimitConfig, RelayService,
    StoreService, TransferError,
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;

async fn file_node(temp_dir: &TempDir) -> Arc<Node> {
    let config = NodeConfig {
        node_id: "stress-relay".into(),
        database_url: format!("sqlite://{}", temp_dir.path().join("stress.db").display()),
        lease_idle_timeout: Duration::from_millis(500),
        rate_limit: RateLimitConfig::disabled(),
        local_recipients: vec!["sink".into()],
        ..Default::default()
    };
    Arc::new(Node::builder(config).build().await.unwrap())
}

fn message(id: &str, body: &[u8]) -> Message {
    let mut msg = Message::new(id, "sink", body, Duration::from_secs(3600));
    sign(&mut msg, &SigningKey::from_bytes(&[5u8; 32]));
    msg
}

fn chunked(body: &[u8], chunk_size: usize) -> ContentStream {
    let items: Vec<io::Result<Bytes>> = body
        .chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(items).boxed()
}

fn quick_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(100),
        max_elapsed_time: Some(Duration::from_secs(20)),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_pushes() {
    println!("\n=== Concurrent Distinct Pushes ===\n");

    let temp_dir = TempDir::new().unwrap();
    let node = file_node(&temp_dir).await;
    let semaphore = Arc::new(Semaphore::new(8));
    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..32usize {
        let node = Arc::clone(&node);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.unwrap();
            let body: Vec<u8> = (0..4096).map(|b| ((b + i * 31) % 251) as u8).collect();
            let msg = message(&format!("msg-{}", i), &body);
            node.push(&format!("peer-{}", i % 4), msg, 0, chunked(&body, 1000))
                .await
        }));
    }

    let mut stored = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_stored() {
            stored += 1;
        }
    }

    assert_eq!(stored, 32);
    let stats = node.stats().await.unwrap();
    assert_eq!(stats.messages, 32);
    assert_eq!(stats.partials, 0);
    assert_eq!(node.transfers().leases().active(), 0);
    println!("✓ 32 messages stored in {:?}", start.elapsed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_pushes() {
    println!("\n=== Concurrent Identical Pushes ===\n");

    let temp_dir = TempDir::new().unwrap();
    let node = file_node(&temp_dir).await;
    let body = vec![0xabu8; 64 * 1024];
    let msg = message("shared", &body);

    let mut handles = Vec::new();
    for i in 0..16usize {
        let node = Arc::clone(&node);
        let msg = msg.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            let peer = format!("peer-{}", i);
            with_backoff_config(quick_backoff(), || {
                let node = Arc::clone(&node);
                let msg = msg.clone();
                let body = body.clone();
                let peer = peer.clone();
                async move {
                    let offset = node.resume_offset(&msg).await?;
                    let rest = body[offset as usize..].to_vec();
                    match node.push(&peer, msg, offset, chunked(&rest, 8192)).await {
                        // Another peer moved the offset; ask again
                        Err(TransferError::IncorrectOffset { .. }) => Err(
                            TransferError::Interrupted("offset moved, resuming".into()),
                        ),
                        other => other,
                    }
                }
            })
            .await
        }));
    }

    let mut stored = 0;
    let mut already_seen = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(PushOutcome::Stored(_)) => stored += 1,
            Ok(PushOutcome::Incomplete { offset }) => panic!("unexpected partial at {}", offset),
            Err(e) if e.class() == ErrorClass::Benign => already_seen += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    println!("✓ stored: {}, already seen: {}", stored, already_seen);
    assert_eq!(stored, 1);
    assert_eq!(stored + already_seen, 16);

    let (_, data) = node
        .pull("shared", 0)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(data, body);
    assert_eq!(node.stats().await.unwrap().partials, 0);
}
