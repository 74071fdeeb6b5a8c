//! Integration tests for chatrelay
//!
//! These tests verify end-to-end behavior, in-process through the service API
//! and over TCP through the server and client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use logstore::{LogStore, MemoryLogStore, SqliteLogStore};
use tempfile::TempDir;
use tokio::sync::mpsc;

use chatrelay::domain::Message;
use chatrelay::rpc::{RelayClient, RelayServer};
use chatrelay::service::RelayService;
use chatrelay::subscription::PollSettings;

fn fast_polling() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_millis(20),
        block_timeout: Duration::from_millis(1),
    }
}

async fn wait_for_count(service: &RelayService, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.active_subscription_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("subscription count did not reach {}", expected));
}

async fn start_server(store: Arc<dyn LogStore>) -> (SocketAddr, RelayService, mpsc::Sender<()>) {
    let service = RelayService::new(store, "chat", fast_polling());
    let server = RelayServer::bind("127.0.0.1:0", service.clone())
        .await
        .expect("Failed to bind server");
    let addr = server.local_addr().expect("Failed to read local address");
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(server.run(shutdown_rx));
    (addr, service, shutdown_tx)
}

// =============================================================================
// In-process scenario
// =============================================================================

#[tokio::test]
async fn test_scenario_in_process() {
    let service = RelayService::new(Arc::new(MemoryLogStore::new()), "chat", fast_polling());

    service.publish(&Message::new("alice", "hi")).await.unwrap();
    service.publish(&Message::new("bob", "yo")).await.unwrap();
    assert_eq!(
        service.read_backlog().await.unwrap(),
        vec![Message::new("alice", "hi"), Message::new("bob", "yo")]
    );

    let mut subscription = service.spawn_subscription(8).await.unwrap();
    assert_eq!(service.active_subscription_count(), 1);

    service.publish(&Message::new("carol", "sup")).await.unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(5), subscription.next_batch())
        .await
        .expect("timed out waiting for batch")
        .expect("subscription ended early");
    assert_eq!(batch, vec![Message::new("carol", "sup")]);

    subscription.cancel().await.unwrap();
    assert_eq!(service.active_subscription_count(), 0);
}

#[tokio::test]
async fn test_publish_immediately_after_subscribe_is_delivered() {
    let service = RelayService::new(Arc::new(MemoryLogStore::new()), "chat", fast_polling());
    for _ in 0..20 {
        let mut subscription = service.spawn_subscription(4).await.unwrap();
        service.publish(&Message::new("carol", "sup")).await.unwrap();
        let batch = tokio::time::timeout(Duration::from_millis(500), subscription.next_batch())
            .await
            .expect("message published right after subscribing was lost")
            .expect("subscription ended early");
        assert_eq!(batch, vec![Message::new("carol", "sup")]);
        subscription.cancel().await.unwrap();
    }
    assert_eq!(service.active_subscription_count(), 0);
}

#[tokio::test]
async fn test_backlog_is_a_snapshot() {
    let service = RelayService::new(Arc::new(MemoryLogStore::new()), "chat", fast_polling());
    service.publish(&Message::new("alice", "1")).await.unwrap();

    let before = service.read_backlog().await.unwrap();
    service.publish(&Message::new("alice", "2")).await.unwrap();
    let after = service.read_backlog().await.unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(after.len(), 2);
    assert_eq!(after[0], before[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_count_converges_to_zero_under_churn() {
    let service = RelayService::new(Arc::new(MemoryLogStore::new()), "chat", fast_polling());

    let mut subscriptions = Vec::new();
    for round in 0..5 {
        for _ in 0..10 {
            subscriptions.push(service.spawn_subscription(4).await.unwrap());
        }
        // Cancel every other one while the rest keep running
        let mut keep = Vec::new();
        for (i, sub) in subscriptions.drain(..).enumerate() {
            if (i + round) % 2 == 0 {
                sub.cancel().await.unwrap();
            } else {
                keep.push(sub);
            }
        }
        subscriptions = keep;
        assert!(service.active_subscription_count() <= subscriptions.len());
    }

    wait_for_count(&service, subscriptions.len()).await;
    for sub in subscriptions {
        sub.cancel().await.unwrap();
    }
    assert_eq!(service.active_subscription_count(), 0);
}

#[tokio::test]
async fn test_store_outage_ends_only_live_subscriptions() {
    let store = Arc::new(MemoryLogStore::new());
    let service = RelayService::new(store.clone(), "chat", fast_polling());

    let first = service.spawn_subscription(4).await.unwrap();
    let second = service.spawn_subscription(4).await.unwrap();
    assert_eq!(service.active_subscription_count(), 2);

    store.set_available(false);
    assert!(first.wait().await.is_err());
    assert!(second.wait().await.is_err());
    assert_eq!(service.active_subscription_count(), 0);

    // The relay keeps working once the store is back
    store.set_available(true);
    service.publish(&Message::new("alice", "back")).await.unwrap();
    assert_eq!(service.read_backlog().await.unwrap().len(), 1);
}

// =============================================================================
// Over TCP
// =============================================================================

#[tokio::test]
async fn test_scenario_over_tcp() {
    let (addr, service, _shutdown) = start_server(Arc::new(MemoryLogStore::new())).await;
    let client = RelayClient::new(addr.to_string());

    client.publish("alice", "hi").await.unwrap();
    client.publish("bob", "yo").await.unwrap();
    assert_eq!(
        client.read_backlog().await.unwrap(),
        vec![Message::new("alice", "hi"), Message::new("bob", "yo")]
    );

    let mut subscription = client.subscribe().await.unwrap();
    assert_eq!(service.active_subscription_count(), 1);
    assert_eq!(client.active_subscription_count().await.unwrap(), 1);

    client.publish("carol", "sup").await.unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(5), subscription.next_batch())
        .await
        .expect("timed out waiting for batch")
        .unwrap()
        .expect("subscription ended early");
    assert_eq!(batch, vec![Message::new("carol", "sup")]);

    drop(subscription);
    wait_for_count(&service, 0).await;
    assert_eq!(client.active_subscription_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_remote_stream_delivers_in_order() {
    let (addr, _service, _shutdown) = start_server(Arc::new(MemoryLogStore::new())).await;
    let client = RelayClient::new(addr.to_string());

    let stream = client.subscribe().await.unwrap().into_stream();

    for i in 0..10 {
        client.publish("alice", &format!("m{}", i)).await.unwrap();
    }

    let mut stream = Box::pin(stream);
    let mut received = Vec::new();
    while received.len() < 10 {
        let batch = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for batch")
            .expect("stream ended early")
            .unwrap();
        received.extend(batch);
    }
    let bodies: Vec<_> = received.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["m0", "m1", "m2", "m3", "m4", "m5", "m6", "m7", "m8", "m9"]);
}

#[tokio::test]
async fn test_remote_publish_immediately_after_subscribe_is_delivered() {
    let (addr, _service, _shutdown) = start_server(Arc::new(MemoryLogStore::new())).await;
    let client = RelayClient::new(addr.to_string());

    let mut subscription = client.subscribe().await.unwrap();
    client.publish("carol", "sup").await.unwrap();
    let batch = tokio::time::timeout(Duration::from_millis(500), subscription.next_batch())
        .await
        .expect("message published right after subscribing was lost")
        .unwrap()
        .expect("subscription ended early");
    assert_eq!(batch, vec![Message::new("carol", "sup")]);
}

#[tokio::test]
async fn test_subscribe_fails_while_store_is_down() {
    let store = Arc::new(MemoryLogStore::new());
    let (addr, service, _shutdown) = start_server(store.clone()).await;
    let client = RelayClient::new(addr.to_string());

    store.set_available(false);
    let err = client.subscribe().await.err().expect("subscribe should fail");
    assert!(err.to_string().contains("store_unavailable"));
    wait_for_count(&service, 0).await;
}

#[tokio::test]
async fn test_store_failure_reported_to_remote_subscriber() {
    let store = Arc::new(MemoryLogStore::new());
    let (addr, service, _shutdown) = start_server(store.clone()).await;
    let client = RelayClient::new(addr.to_string());

    let mut subscription = client.subscribe().await.unwrap();
    assert_eq!(service.active_subscription_count(), 1);

    store.set_available(false);
    let result = tokio::time::timeout(Duration::from_secs(5), subscription.next_batch())
        .await
        .expect("timed out waiting for error");
    let err = result.expect_err("store outage should end the subscription");
    assert!(err.to_string().contains("store_unavailable"));
    wait_for_count(&service, 0).await;

    let publish = client.publish("alice", "hi").await;
    assert!(publish.unwrap_err().to_string().contains("store_unavailable"));
}

#[tokio::test]
async fn test_sqlite_backlog_survives_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("chat.db");

    {
        let store = SqliteLogStore::open(&path).unwrap();
        let (addr, _service, shutdown) = start_server(Arc::new(store.clone())).await;
        let client = RelayClient::new(addr.to_string());
        client.publish("alice", "hi").await.unwrap();
        client.publish("bob", "yo").await.unwrap();
        shutdown.send(()).await.unwrap();
        store.shutdown().await.unwrap();
    }

    let store = SqliteLogStore::open(&path).unwrap();
    let (addr, _service, _shutdown) = start_server(Arc::new(store)).await;
    let client = RelayClient::new(addr.to_string());
    assert_eq!(
        client.read_backlog().await.unwrap(),
        vec![Message::new("alice", "hi"), Message::new("bob", "yo")]
    );
}
