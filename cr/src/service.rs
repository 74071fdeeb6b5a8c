//! The relay operations: publish, backlog read, subscribe, subscriber count
//!
//! `RelayService` is transport-agnostic. The RPC server drives it over TCP
//! and tests drive it in-process.

use std::sync::Arc;

use logstore::{Cursor, EntryId, LogStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{Message, decode_entries};
use crate::error::{RelayError, RelayResult};
use crate::subscription::{
    BatchSink, CancelHandle, Cancellation, ChannelSink, PollSettings, SessionSummary, SubscriberRegistry,
    SubscriptionEngine, cancellation,
};

/// Relay over one log stream
#[derive(Clone)]
pub struct RelayService {
    store: Arc<dyn LogStore>,
    stream_key: String,
    engine: SubscriptionEngine,
}

impl RelayService {
    pub fn new(store: Arc<dyn LogStore>, stream_key: impl Into<String>, settings: PollSettings) -> Self {
        let stream_key = stream_key.into();
        let engine = SubscriptionEngine::new(store.clone(), stream_key.clone(), SubscriberRegistry::new(), settings);
        Self {
            store,
            stream_key,
            engine,
        }
    }

    /// Append a message to the log
    ///
    /// Store failures are returned unchanged; nothing is retried.
    pub async fn publish(&self, message: &Message) -> RelayResult<EntryId> {
        debug!(sender = %message.sender, "RelayService::publish: called");
        let id = self.store.append(&self.stream_key, message.to_fields()).await?;
        info!(%id, sender = %message.sender, "message sent");
        Ok(id)
    }

    /// Every message currently in the log, oldest first
    pub async fn read_backlog(&self) -> RelayResult<Vec<Message>> {
        debug!("RelayService::read_backlog: called");
        let entries = self
            .store
            .read_after(&self.stream_key, Cursor::Beginning, None)
            .await?
            .into_entries();
        let messages: Vec<Message> = decode_entries(&entries)?.into_iter().map(|e| e.message).collect();
        debug!(count = messages.len(), "RelayService::read_backlog: decoded");
        Ok(messages)
    }

    /// Run a live subscription on the current task until cancelled or failed
    pub async fn subscribe<S: BatchSink>(&self, sink: &mut S, cancel: Cancellation) -> RelayResult<SessionSummary> {
        debug!("RelayService::subscribe: called");
        self.engine.run(sink, cancel).await
    }

    /// Spawn a live subscription that delivers into a bounded channel
    ///
    /// Returns once the subscription is positioned, so every message
    /// published after this returns is delivered to it.
    pub async fn spawn_subscription(&self, capacity: usize) -> RelayResult<Subscription> {
        debug!(capacity, "RelayService::spawn_subscription: called");
        let (tx, batches) = mpsc::channel(capacity.max(1));
        let (mut sink, started) = ChannelSink::new(tx);
        let (cancel, signal) = cancellation();
        let service = self.clone();
        let task = tokio::spawn(async move { service.subscribe(&mut sink, signal).await });

        if started.await.is_err() {
            // The task ended before it was positioned
            join(task).await?;
            return Err(RelayError::TaskFailed("subscription ended before it started".to_string()));
        }
        Ok(Subscription { batches, cancel, task })
    }

    /// Number of subscriptions currently live
    pub fn active_subscription_count(&self) -> usize {
        self.engine.registry().active_count()
    }
}

/// Handle to a spawned subscription
///
/// Dropping the handle cancels the subscription.
pub struct Subscription {
    batches: mpsc::Receiver<Vec<Message>>,
    cancel: CancelHandle,
    task: JoinHandle<RelayResult<SessionSummary>>,
}

impl Subscription {
    /// Next delivered batch, `None` once the subscription has ended
    pub async fn next_batch(&mut self) -> Option<Vec<Message>> {
        self.batches.recv().await
    }

    /// Cancel and wait for the subscription to wind down
    pub async fn cancel(self) -> RelayResult<SessionSummary> {
        self.cancel.cancel();
        join(self.task).await
    }

    /// Wait for the subscription to end on its own (store or delivery failure)
    pub async fn wait(self) -> RelayResult<SessionSummary> {
        let Subscription {
            batches: _batches,
            cancel: _cancel,
            task,
        } = self;
        join(task).await
    }
}

async fn join(task: JoinHandle<RelayResult<SessionSummary>>) -> RelayResult<SessionSummary> {
    task.await.map_err(|e| RelayError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use logstore::{Fields, MemoryLogStore};
    use std::time::Duration;

    fn service(store: Arc<MemoryLogStore>) -> RelayService {
        RelayService::new(
            store,
            "chat",
            PollSettings {
                poll_interval: Duration::from_millis(10),
                block_timeout: Duration::from_millis(1),
            },
        )
    }

    async fn wait_for_count(service: &RelayService, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.active_subscription_count() != expected {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("subscription count did not converge");
    }

    #[tokio::test]
    async fn test_publish_then_backlog_in_order() {
        let service = service(Arc::new(MemoryLogStore::new()));
        service.publish(&Message::new("alice", "hi")).await.unwrap();
        service.publish(&Message::new("bob", "yo")).await.unwrap();

        let backlog = service.read_backlog().await.unwrap();
        assert_eq!(backlog, vec![Message::new("alice", "hi"), Message::new("bob", "yo")]);
    }

    #[tokio::test]
    async fn test_publish_ids_increase() {
        let service = service(Arc::new(MemoryLogStore::new()));
        let first = service.publish(&Message::new("alice", "1")).await.unwrap();
        let second = service.publish(&Message::new("alice", "2")).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_backlog_of_empty_log() {
        let service = service(Arc::new(MemoryLogStore::new()));
        assert!(service.read_backlog().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_unavailable_is_surfaced() {
        let store = Arc::new(MemoryLogStore::new());
        let service = service(store.clone());
        store.set_available(false);

        let publish = service.publish(&Message::new("alice", "hi")).await;
        assert!(matches!(publish, Err(RelayError::StoreUnavailable(_))));
        let backlog = service.read_backlog().await;
        assert!(matches!(backlog, Err(RelayError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_backlog_rejects_malformed_entry() {
        let store = Arc::new(MemoryLogStore::new());
        let service = service(store.clone());
        let mut fields = Fields::new();
        fields.insert("msg".to_string(), "orphan".to_string());
        store.append("chat", fields).await.unwrap();

        let result = service.read_backlog().await;
        assert!(matches!(result, Err(RelayError::MalformedEntry { field: "name", .. })));
    }

    #[tokio::test]
    async fn test_spawned_subscription_receives_and_cancels() {
        let service = service(Arc::new(MemoryLogStore::new()));
        let mut sub = service.spawn_subscription(4).await.unwrap();
        assert_eq!(service.active_subscription_count(), 1);

        service.publish(&Message::new("carol", "sup")).await.unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(2), sub.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch, vec![Message::new("carol", "sup")]);

        let summary = sub.cancel().await.unwrap();
        assert_eq!(summary.messages_sent, 1);
        assert_eq!(service.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_subscription_handle_cancels() {
        let service = service(Arc::new(MemoryLogStore::new()));
        let sub = service.spawn_subscription(4).await.unwrap();
        assert_eq!(service.active_subscription_count(), 1);

        drop(sub);
        wait_for_count(&service, 0).await;
    }

    #[tokio::test]
    async fn test_wait_returns_store_failure() {
        let store = Arc::new(MemoryLogStore::new());
        let service = service(store.clone());
        let sub = service.spawn_subscription(4).await.unwrap();

        store.set_available(false);
        let result = tokio::time::timeout(Duration::from_secs(2), sub.wait()).await.unwrap();
        assert!(matches!(result, Err(RelayError::StoreUnavailable(_))));
        assert_eq!(service.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_right_after_spawn_is_delivered() {
        let service = service(Arc::new(MemoryLogStore::new()));
        service.publish(&Message::new("alice", "hi")).await.unwrap();

        let mut sub = service.spawn_subscription(4).await.unwrap();
        service.publish(&Message::new("carol", "sup")).await.unwrap();

        let batch = tokio::time::timeout(Duration::from_millis(500), sub.next_batch())
            .await
            .expect("message published after spawn was not delivered")
            .unwrap();
        assert_eq!(batch, vec![Message::new("carol", "sup")]);
        sub.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_fails_when_store_is_down() {
        let store = Arc::new(MemoryLogStore::new());
        let service = service(store.clone());
        store.set_available(false);

        let result = service.spawn_subscription(4).await;
        assert!(matches!(result, Err(RelayError::StoreUnavailable(_))));
        assert_eq!(service.active_subscription_count(), 0);
    }
}
