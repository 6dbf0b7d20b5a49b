//! Delivery Dispatcher - turns sequenced events into projection updates
//! and pushes to live connections.
//!
//! Registered as the single mandatory consumer on the event bus. Events
//! are applied strictly in global sequence order: the expected next
//! sequence is tracked and out-of-order arrivals wait in a bounded
//! reorder buffer until the gap fills. If the buffer overflows, whatever
//! is buffered is drained in ascending order and the expected sequence
//! jumps forward; an event later arriving below the watermark still
//! updates the idempotent projections but is not pushed (that would break
//! per-user order), and its targets are marked degraded so their next
//! reconnect resyncs fully.
//!
//! Projection updates always run, online or not; the push is the only
//! part gated on presence. A projection write that exhausts its retries
//! also degrades the affected user rather than failing the publish.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::retry::run_with_retry;
use super::{CatchUpCoordinator, ChatOrderingIndex, EventConsumer, PresenceRegistry, UnreadAggregator};
use crate::config::{RealtimeConfig, RetryConfig};
use crate::domain::chat::ChatSummary;
use crate::domain::foundation::{DomainError, EventEnvelope, EventKind, Sequence, UserId};
use crate::ports::{chat_summary_key, ProjectionStore, PushFrame};

struct Lane {
    next_expected: Sequence,
    pending: BTreeMap<Sequence, EventEnvelope>,
}

/// Ordered, at-least-once event application and push.
pub struct DeliveryDispatcher {
    presence: PresenceRegistry,
    unread: Arc<UnreadAggregator>,
    ordering: Arc<ChatOrderingIndex>,
    catchup: Arc<CatchUpCoordinator>,
    store: Arc<dyn ProjectionStore>,
    retry: RetryConfig,
    buffer_depth: usize,
    lane: Mutex<Lane>,
}

impl DeliveryDispatcher {
    /// Creates a dispatcher expecting the first event after `last_applied`
    /// (the head of the restored event log, `Sequence::ZERO` when fresh).
    pub fn new(
        presence: PresenceRegistry,
        unread: Arc<UnreadAggregator>,
        ordering: Arc<ChatOrderingIndex>,
        catchup: Arc<CatchUpCoordinator>,
        store: Arc<dyn ProjectionStore>,
        config: &RealtimeConfig,
        last_applied: Sequence,
    ) -> Self {
        Self {
            presence,
            unread,
            ordering,
            catchup,
            store,
            retry: config.retry,
            buffer_depth: config.ordering_buffer_depth,
            lane: Mutex::new(Lane {
                next_expected: last_applied.next(),
                pending: BTreeMap::new(),
            }),
        }
    }

    async fn apply(&self, event: &EventEnvelope, push: bool) {
        match event.kind {
            EventKind::MessageSent => self.apply_message_sent(event).await,
            EventKind::MessageRead => self.apply_message_read(event).await,
            // Notification-only kinds carry no projection state.
            _ => {}
        }

        if push {
            self.push_to_targets(event).await;
        }
    }

    async fn apply_message_sent(&self, event: &EventEnvelope) {
        let (Some(payload), Some(chat_id)) = (event.message_sent_payload(), event.chat_id) else {
            tracing::warn!(
                sequence = %event.sequence,
                kind = %event.kind,
                "malformed message.sent event, skipping projection update"
            );
            return;
        };

        let counts = self
            .unread
            .on_message_created(
                chat_id,
                event.sequence,
                payload.sender_id,
                &event.target_user_ids,
            )
            .await;

        for (user_id, unread_count) in counts {
            if !user_id.is_routable() {
                tracing::warn!(
                    sequence = %event.sequence,
                    user_id = %user_id,
                    "unknown recipient, dropping delivery for this target"
                );
                continue;
            }
            let summary = self
                .ordering
                .on_message_created(
                    user_id,
                    chat_id,
                    &payload.preview,
                    event.occurred_at,
                    event.sequence,
                    unread_count,
                )
                .await;
            if let Some(summary) = summary {
                self.persist_summary(user_id, &summary).await;
            }
        }
    }

    async fn apply_message_read(&self, event: &EventEnvelope) {
        let (Some(payload), Some(chat_id)) = (event.message_read_payload(), event.chat_id) else {
            tracing::warn!(
                sequence = %event.sequence,
                kind = %event.kind,
                "malformed message.read event, skipping projection update"
            );
            return;
        };

        self.unread
            .on_message_read(chat_id, payload.reader_id, payload.up_to_seq)
            .await;
        let unread_count = self.unread.unread(payload.reader_id, chat_id).await;
        if let Some(summary) = self
            .ordering
            .set_unread(payload.reader_id, chat_id, unread_count)
            .await
        {
            self.persist_summary(payload.reader_id, &summary).await;
        }
    }

    async fn persist_summary(&self, user_id: UserId, summary: &ChatSummary) {
        let value = serde_json::to_value(summary).expect("summary serialization is infallible");
        let key = chat_summary_key(user_id, summary.chat_id);
        let result = run_with_retry(&self.retry, "projection_store.put", || {
            self.store.put(&key, value.clone())
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(
                user_id = %user_id,
                chat_id = %summary.chat_id,
                error = %e,
                "summary persistence exhausted retries, degrading user cursor"
            );
            self.catchup.mark_degraded(user_id).await;
        }
    }

    async fn push_to_targets(&self, event: &EventEnvelope) {
        for &user_id in &event.target_user_ids {
            if !user_id.is_routable() {
                continue;
            }
            // push_to_user is a no-op for offline users; they pick the
            // event up from the log at their next reconnect.
            self.presence
                .push_to_user(user_id, PushFrame::Event(event.clone()))
                .await;
        }
    }

    async fn degrade_targets(&self, event: &EventEnvelope) {
        for &user_id in &event.target_user_ids {
            if user_id.is_routable() {
                self.catchup.mark_degraded(user_id).await;
            }
        }
    }
}

#[async_trait]
impl EventConsumer for DeliveryDispatcher {
    async fn consume(&self, event: &EventEnvelope) -> Result<(), DomainError> {
        let mut lane = self.lane.lock().await;

        if event.sequence < lane.next_expected {
            // Below the watermark: either a duplicate (projections are
            // idempotent, so re-applying is harmless) or an event skipped
            // by an earlier buffer overflow. Pushing now would reorder the
            // live stream, so targets get a forced resync instead.
            tracing::warn!(
                sequence = %event.sequence,
                next_expected = %lane.next_expected,
                "late event, applying projections without push"
            );
            self.apply(event, false).await;
            self.degrade_targets(event).await;
            return Ok(());
        }

        if event.sequence > lane.next_expected {
            lane.pending.insert(event.sequence, event.clone());
            if lane.pending.len() <= self.buffer_depth {
                return Ok(());
            }
            // Overflow: the gap is not filling. Drain in ascending order
            // and jump past it; anything still missing arrives late and
            // is handled above.
            tracing::warn!(
                next_expected = %lane.next_expected,
                buffered = lane.pending.len(),
                "ordering buffer overflow, draining and jumping forward"
            );
            let drained: Vec<EventEnvelope> =
                std::mem::take(&mut lane.pending).into_values().collect();
            for buffered in &drained {
                self.apply(buffered, true).await;
            }
            if let Some(last) = drained.last() {
                lane.next_expected = last.sequence.next();
            }
            return Ok(());
        }

        self.apply(event, true).await;
        lane.next_expected = event.sequence.next();

        // The arrival may have filled the gap in front of the buffer.
        loop {
            let next = lane.next_expected;
            let Some(buffered) = lane.pending.remove(&next) else {
                break;
            };
            self.apply(&buffered, true).await;
            lane.next_expected = buffered.sequence.next();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "delivery_dispatcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryEventLog, InMemoryProjectionStore};
    use crate::config::RetryConfig;
    use crate::application::presence::ConnectionHandle;
    use crate::domain::foundation::{ChatId, DeviceTag, EventDraft, MessageId, Timestamp};
    use crate::ports::ConnectionSink;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn user(id: i64) -> UserId {
        UserId::new(id)
    }

    fn chat(id: i64) -> ChatId {
        ChatId::new(id)
    }

    fn seq(n: u64) -> Sequence {
        Sequence::new(n)
    }

    struct RecordingSink {
        frames: StdMutex<Vec<PushFrame>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: StdMutex::new(Vec::new()),
            })
        }

        fn event_sequences(&self) -> Vec<u64> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .filter_map(|f| match f {
                    PushFrame::Event(e) => Some(e.sequence.as_u64()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ConnectionSink for RecordingSink {
        async fn push(&self, frame: PushFrame) -> Result<(), DomainError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: DeliveryDispatcher,
        presence: PresenceRegistry,
        unread: Arc<UnreadAggregator>,
        ordering: Arc<ChatOrderingIndex>,
        catchup: Arc<CatchUpCoordinator>,
        store: Arc<InMemoryProjectionStore>,
    }

    fn fixture_with(buffer_depth: usize) -> Fixture {
        let config = RealtimeConfig {
            ordering_buffer_depth: buffer_depth,
            retry: RetryConfig {
                max_attempts: 2,
                backoff_ms: 1,
            },
            ..Default::default()
        };
        let presence =
            PresenceRegistry::new(Duration::from_secs(60), Duration::from_millis(500));
        let unread = Arc::new(UnreadAggregator::new());
        let ordering = Arc::new(ChatOrderingIndex::new());
        let store = Arc::new(InMemoryProjectionStore::new());
        let catchup = Arc::new(CatchUpCoordinator::new(
            Arc::new(InMemoryEventLog::new()),
            store.clone(),
            &config,
        ));
        let dispatcher = DeliveryDispatcher::new(
            presence.clone(),
            unread.clone(),
            ordering.clone(),
            catchup.clone(),
            store.clone(),
            &config,
            Sequence::ZERO,
        );
        Fixture {
            dispatcher,
            presence,
            unread,
            ordering,
            catchup,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(64)
    }

    fn message_sent(sequence: u64, sender: i64, targets: &[i64]) -> EventEnvelope {
        EventDraft::message_sent(
            chat(1),
            MessageId::new(sequence as i64),
            user(sender),
            format!("msg {}", sequence),
            targets.iter().map(|&id| user(id)).collect(),
        )
        .at(Timestamp::from_unix_millis(sequence as i64 * 1_000))
        .stamp(seq(sequence))
    }

    async fn connect(fixture: &Fixture, user_id: UserId) -> Arc<RecordingSink> {
        let sink = RecordingSink::new();
        fixture
            .presence
            .connect(ConnectionHandle::new(
                user_id,
                DeviceTag::new("test"),
                sink.clone(),
            ))
            .await;
        sink
    }

    #[tokio::test]
    async fn in_order_events_are_applied_and_pushed() {
        let f = fixture();
        let sink = connect(&f, user(2)).await;

        f.dispatcher.consume(&message_sent(1, 1, &[1, 2])).await.unwrap();
        f.dispatcher.consume(&message_sent(2, 1, &[1, 2])).await.unwrap();

        assert_eq!(sink.event_sequences(), vec![1, 2]);
        assert_eq!(f.unread.unread(user(2), chat(1)).await, 2);
    }

    #[tokio::test]
    async fn offline_targets_still_get_projection_updates() {
        let f = fixture();
        f.dispatcher.consume(&message_sent(1, 1, &[1, 2])).await.unwrap();

        assert_eq!(f.unread.unread(user(2), chat(1)).await, 1);
        let summary = f.ordering.summary(user(2), chat(1)).await.unwrap();
        assert_eq!(summary.unread_count, 1);
        assert!(f
            .store
            .get(&chat_summary_key(user(2), chat(1)))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn gapped_event_waits_for_the_gap_to_fill() {
        let f = fixture();
        let sink = connect(&f, user(2)).await;

        f.dispatcher.consume(&message_sent(1, 1, &[2])).await.unwrap();
        f.dispatcher.consume(&message_sent(3, 1, &[2])).await.unwrap();
        assert_eq!(sink.event_sequences(), vec![1]);

        f.dispatcher.consume(&message_sent(2, 1, &[2])).await.unwrap();
        assert_eq!(sink.event_sequences(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn buffer_overflow_drains_ascending_and_jumps() {
        let f = fixture_with(2);
        let sink = connect(&f, user(2)).await;

        // Sequence 1 never arrives; 2, 3, 4 overflow a depth-2 buffer.
        f.dispatcher.consume(&message_sent(4, 1, &[2])).await.unwrap();
        f.dispatcher.consume(&message_sent(2, 1, &[2])).await.unwrap();
        f.dispatcher.consume(&message_sent(3, 1, &[2])).await.unwrap();

        assert_eq!(sink.event_sequences(), vec![2, 3, 4]);

        // The watermark jumped past the drained events.
        f.dispatcher.consume(&message_sent(5, 1, &[2])).await.unwrap();
        assert_eq!(sink.event_sequences(), vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn late_event_updates_projections_but_is_not_pushed() {
        let f = fixture_with(1);
        let sink = connect(&f, user(2)).await;

        // Overflow jumps the watermark past the missing sequence 1.
        f.dispatcher.consume(&message_sent(2, 1, &[2])).await.unwrap();
        f.dispatcher.consume(&message_sent(3, 1, &[2])).await.unwrap();
        assert_eq!(sink.event_sequences(), vec![2, 3]);

        f.dispatcher.consume(&message_sent(1, 1, &[2])).await.unwrap();

        // No push, but the unread count includes the late message and the
        // user is flagged for a full resync.
        assert_eq!(sink.event_sequences(), vec![2, 3]);
        assert_eq!(f.unread.unread(user(2), chat(1)).await, 3);
        assert!(f.catchup.cursor(user(2)).await.unwrap().degraded);
    }

    #[tokio::test]
    async fn duplicate_event_is_idempotent() {
        let f = fixture();
        f.dispatcher.consume(&message_sent(1, 1, &[2])).await.unwrap();
        f.dispatcher.consume(&message_sent(1, 1, &[2])).await.unwrap();

        assert_eq!(f.unread.unread(user(2), chat(1)).await, 1);
    }

    #[tokio::test]
    async fn unroutable_recipient_is_dropped_while_others_deliver() {
        let f = fixture();
        let sink = connect(&f, user(2)).await;

        f.dispatcher.consume(&message_sent(1, 1, &[0, 2])).await.unwrap();

        assert_eq!(sink.event_sequences(), vec![1]);
        assert_eq!(f.unread.unread(user(2), chat(1)).await, 1);
    }

    #[tokio::test]
    async fn read_event_clears_unread_and_updates_the_summary() {
        let f = fixture();
        f.dispatcher.consume(&message_sent(1, 1, &[1, 2])).await.unwrap();
        f.dispatcher.consume(&message_sent(2, 1, &[1, 2])).await.unwrap();

        let read = EventDraft::message_read(chat(1), user(2), seq(2)).stamp(seq(3));
        f.dispatcher.consume(&read).await.unwrap();

        assert_eq!(f.unread.unread(user(2), chat(1)).await, 0);
        let summary = f.ordering.summary(user(2), chat(1)).await.unwrap();
        assert_eq!(summary.unread_count, 0);
    }

    #[tokio::test]
    async fn read_event_is_pushed_to_the_reader() {
        let f = fixture();
        let sink = connect(&f, user(2)).await;
        f.dispatcher.consume(&message_sent(1, 1, &[2])).await.unwrap();

        let read = EventDraft::message_read(chat(1), user(2), seq(1)).stamp(seq(2));
        f.dispatcher.consume(&read).await.unwrap();

        // Both the message and the read receipt reached the reader's
        // devices, in order.
        assert_eq!(sink.event_sequences(), vec![1, 2]);
    }

    #[tokio::test]
    async fn summary_persistence_failure_degrades_the_user() {
        let f = fixture();
        f.store.fail_next_puts(100);

        f.dispatcher.consume(&message_sent(1, 1, &[2])).await.unwrap();

        // In-memory projections still advanced.
        assert_eq!(f.unread.unread(user(2), chat(1)).await, 1);
        assert!(f.catchup.cursor(user(2)).await.unwrap().degraded);
    }

    #[tokio::test]
    async fn notification_kinds_push_without_projection_state() {
        let f = fixture();
        let sink = connect(&f, user(2)).await;

        let event = EventDraft::new(
            EventKind::PostLiked,
            vec![user(2)],
            serde_json::json!({"post_id": 9}),
        )
        .stamp(seq(1));
        f.dispatcher.consume(&event).await.unwrap();

        assert_eq!(sink.event_sequences(), vec![1]);
        assert_eq!(f.unread.total_unread(user(2)).await, 0);
    }
}
