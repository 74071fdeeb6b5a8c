//! Outbound channel and cancellation signal of a subscription
//!
//! The RPC boundary hands the engine a [`BatchSink`] to push batches into
//! and a [`Cancellation`] it fires when the client goes away.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use crate::domain::Message;
use crate::error::{RelayError, RelayResult};

/// Destination for delivered batches
#[async_trait]
pub trait BatchSink: Send {
    /// Called once, after the start cursor is fixed and before the first poll
    ///
    /// Anything published after this returns is delivered.
    async fn started(&mut self) -> RelayResult<()> {
        Ok(())
    }

    /// Push one batch; an error means the subscriber is gone
    async fn send_batch(&mut self, batch: Vec<Message>) -> RelayResult<()>;
}

#[async_trait]
impl BatchSink for mpsc::Sender<Vec<Message>> {
    async fn send_batch(&mut self, batch: Vec<Message>) -> RelayResult<()> {
        self.send(batch)
            .await
            .map_err(|_| RelayError::Delivery("subscriber channel closed".to_string()))
    }
}

/// Channel sink that reports when its subscription has started
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<Message>>,
    started: Option<oneshot::Sender<()>>,
}

impl ChannelSink {
    /// Wrap `tx`; the receiver resolves once the start cursor is fixed
    pub fn new(tx: mpsc::Sender<Vec<Message>>) -> (Self, oneshot::Receiver<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let sink = Self {
            tx,
            started: Some(started_tx),
        };
        (sink, started_rx)
    }
}

#[async_trait]
impl BatchSink for ChannelSink {
    async fn started(&mut self) -> RelayResult<()> {
        if let Some(started) = self.started.take() {
            // Nobody waiting is fine
            let _ = started.send(());
        }
        Ok(())
    }

    async fn send_batch(&mut self, batch: Vec<Message>) -> RelayResult<()> {
        self.tx.send_batch(batch).await
    }
}

/// Create a linked cancel handle / cancellation signal pair
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

/// Caller side: fires the cancellation
///
/// Dropping the handle also cancels.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Engine side: resolves once cancellation is requested
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Wait until cancelled (or the handle is dropped)
    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.rx.borrow_and_update();
            if cancelled || self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}
