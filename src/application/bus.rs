//! Event Bus - globally sequenced in-process pub/sub.
//!
//! `publish` stamps every event with the next global sequence, appends it
//! to the event log, hands it to the mandatory consumers (the delivery
//! dispatcher), and then to any best-effort handlers and stream
//! subscribers.
//!
//! Mandatory consumers never silently drop: the log append and each
//! mandatory consume are retried with bounded backoff, and exhaustion
//! surfaces as an error to the publisher. A failing best-effort handler
//! is isolated, retried a bounded number of times, and then the event is
//! logged as dropped for that handler only; it recovers via catch-up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use super::retry::run_with_retry;
use crate::config::RetryConfig;
use crate::domain::foundation::{
    DomainError, EventDraft, EventEnvelope, EventKind, Sequence, SequenceAllocator,
};
use crate::ports::EventLog;

/// Capacity of each per-kind stream subscription channel.
const STREAM_CHANNEL_CAPACITY: usize = 128;

/// A registered event consumer.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    async fn consume(&self, event: &EventEnvelope) -> Result<(), DomainError>;

    /// Name used in logs when the consumer fails.
    fn name(&self) -> &'static str;
}

/// Globally sequenced in-process event bus.
pub struct EventBus {
    allocator: SequenceAllocator,
    log: Arc<dyn EventLog>,
    mandatory: RwLock<Vec<Arc<dyn EventConsumer>>>,
    best_effort: RwLock<HashMap<EventKind, Vec<Arc<dyn EventConsumer>>>>,
    streams: RwLock<HashMap<EventKind, broadcast::Sender<EventEnvelope>>>,
    retry: RetryConfig,
}

impl EventBus {
    /// Creates a bus whose first event gets sequence 1.
    pub fn new(log: Arc<dyn EventLog>, retry: RetryConfig) -> Self {
        Self::starting_after(log, retry, Sequence::ZERO)
    }

    /// Creates a bus resuming after `last`, e.g. the head of a restored
    /// event log.
    pub fn starting_after(log: Arc<dyn EventLog>, retry: RetryConfig, last: Sequence) -> Self {
        Self {
            allocator: SequenceAllocator::resume_after(last),
            log,
            mandatory: RwLock::new(Vec::new()),
            best_effort: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            retry,
        }
    }

    /// Registers a consumer that must see every event.
    pub async fn register_mandatory(&self, consumer: Arc<dyn EventConsumer>) {
        self.mandatory.write().await.push(consumer);
    }

    /// Registers a best-effort handler for one event kind.
    pub async fn register_best_effort(&self, kind: EventKind, consumer: Arc<dyn EventConsumer>) {
        self.best_effort
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(consumer);
    }

    /// Registers a best-effort handler for several event kinds.
    pub async fn register_best_effort_all(
        &self,
        kinds: &[EventKind],
        consumer: Arc<dyn EventConsumer>,
    ) {
        let mut handlers = self.best_effort.write().await;
        for kind in kinds {
            handlers.entry(*kind).or_default().push(Arc::clone(&consumer));
        }
    }

    /// Subscribes to a stream of events of one kind.
    ///
    /// Stream subscribers are best-effort observers: a lagging receiver
    /// loses the oldest buffered events and should resynchronize via
    /// catch-up.
    pub async fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<EventEnvelope> {
        let mut streams = self.streams.write().await;
        streams
            .entry(kind)
            .or_insert_with(|| broadcast::channel(STREAM_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Stamps, persists, and delivers an event.
    ///
    /// Returns the stamped envelope. An error means a mandatory step
    /// exhausted its retries; the sequence is still consumed and the
    /// event may have been partially delivered (at-least-once).
    pub async fn publish(&self, draft: EventDraft) -> Result<EventEnvelope, DomainError> {
        let sequence = self.allocator.allocate();
        let event = draft.stamp(sequence);

        // The log append is the durability point; nothing is delivered
        // until the event would survive a crash.
        run_with_retry(&self.retry, "event_log.append", || {
            self.log.append(event.clone())
        })
        .await?;

        let mandatory: Vec<Arc<dyn EventConsumer>> = self.mandatory.read().await.clone();
        for consumer in mandatory {
            run_with_retry(&self.retry, consumer.name(), || consumer.consume(&event)).await?;
        }

        let handlers: Vec<Arc<dyn EventConsumer>> = {
            let best_effort = self.best_effort.read().await;
            best_effort.get(&event.kind).cloned().unwrap_or_default()
        };
        for handler in handlers {
            if let Err(e) =
                run_with_retry(&self.retry, handler.name(), || handler.consume(&event)).await
            {
                tracing::warn!(
                    handler = handler.name(),
                    sequence = %event.sequence,
                    kind = %event.kind,
                    error = %e,
                    "best-effort handler exhausted retries, event dropped for this handler"
                );
            }
        }

        {
            let streams = self.streams.read().await;
            if let Some(tx) = streams.get(&event.kind) {
                // No receivers is fine.
                let _ = tx.send(event.clone());
            }
        }

        Ok(event)
    }

    /// The most recently allocated sequence.
    pub fn last_sequence(&self) -> Sequence {
        self.allocator.last_allocated()
    }
}
