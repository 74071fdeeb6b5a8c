//! Subscription engine - turns the append-only log into a push stream
//!
//! Each subscription runs this loop in its own task:
//!
//! ```text
//! Starting ──► Polling ──► Terminated
//!               │  ▲
//!               └──┘ tick: read after cursor, push batch, advance cursor
//! ```
//!
//! Cancellation preempts every wait (tick, store read, push). The cursor
//! advances only after a batch is delivered.

use std::sync::Arc;
use std::time::Duration;

use logstore::{LogStore, ReadOutcome};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::{Message, decode_entries};
use crate::error::RelayResult;

use super::registry::SubscriberRegistry;
use super::session::{SessionSummary, SubscriptionSession};
use super::sink::{BatchSink, Cancellation};

/// Default time between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time a single poll may block in the store
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(1);

/// Polling cadence of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub block_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
        }
    }
}

/// Runs live subscriptions against one stream
#[derive(Clone)]
pub struct SubscriptionEngine {
    store: Arc<dyn LogStore>,
    stream_key: String,
    registry: SubscriberRegistry,
    settings: PollSettings,
}

impl SubscriptionEngine {
    pub fn new(
        store: Arc<dyn LogStore>,
        stream_key: impl Into<String>,
        registry: SubscriberRegistry,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            stream_key: stream_key.into(),
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Run one subscription until it is cancelled or fails
    ///
    /// Returns the session summary on cancellation. Store and delivery
    /// failures are returned as errors. The registry is decremented on every
    /// path.
    pub async fn run<S: BatchSink>(&self, sink: &mut S, mut cancel: Cancellation) -> RelayResult<SessionSummary> {
        let mut session = SubscriptionSession::new(self.registry.register());
        info!(session_id = %session.id(), stream = %self.stream_key, "start chat streaming");

        let result = self.poll(&mut session, sink, &mut cancel).await;
        let summary = session.summary();
        match &result {
            Ok(()) => info!(
                session_id = %summary.id,
                reason = "cancelled",
                duration_ms = summary.duration.as_millis() as u64,
                batches = summary.batches_sent,
                messages = summary.messages_sent,
                "streaming is closed"
            ),
            Err(e) => warn!(
                session_id = %summary.id,
                reason = e.kind(),
                error = %e,
                duration_ms = summary.duration.as_millis() as u64,
                batches = summary.batches_sent,
                messages = summary.messages_sent,
                "streaming failed"
            ),
        }
        drop(session);

        result.map(|()| summary)
    }

    /// Poll until cancelled; `Ok` means the subscription was cancelled
    async fn poll<S: BatchSink>(
        &self,
        session: &mut SubscriptionSession,
        sink: &mut S,
        cancel: &mut Cancellation,
    ) -> RelayResult<()> {
        // Only entries appended after this point are delivered
        let start = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            tail = self.store.tail(&self.stream_key) => tail?,
        };
        session.start_at(start);
        debug!(session_id = %session.id(), cursor = %start, "poll: positioned at tail");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            started = sink.started() => started?,
        }

        let period = self.settings.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let cursor = session.cursor();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                read = self.store.read_after(&self.stream_key, cursor, Some(self.settings.block_timeout)) => read?,
            };
            let entries = match outcome {
                ReadOutcome::NoNewData => {
                    debug!(session_id = %session.id(), "no new messages");
                    continue;
                }
                ReadOutcome::Entries(entries) => decode_entries(&entries)?,
            };
            let Some(last) = entries.last().map(|e| e.id) else {
                continue;
            };
            let batch: Vec<Message> = entries.into_iter().map(|e| e.message).collect();
            let count = batch.len();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = sink.send_batch(batch) => sent?,
            }
            session.record_delivery(last, count);
            info!(session_id = %session.id(), count, cursor = %session.cursor(), "sent messages");
        }
    }
}
