//! End-to-end tests for the delivery core.
//!
//! These tests wire the real services together over the in-memory
//! adapters and verify the flows a client observes:
//! 1. Publish on the bus -> dispatcher -> projections and live push
//! 2. Offline miss -> reconnect -> catch-up replay -> acknowledge
//! 3. Live events during catch-up are buffered, deduplicated, and flushed
//! 4. Slow connections are dropped without losing the event

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulsehub::adapters::memory::{InMemoryEventLog, InMemoryProjectionStore};
use pulsehub::application::{
    presence::ConnectionHandle, CatchUpCoordinator, CatchUpPlan, ChatOrderingIndex,
    DeliveryDispatcher, EventBus, EventConsumer, PresenceRegistry, UnreadAggregator,
};
use pulsehub::config::{RealtimeConfig, RetryConfig};
use pulsehub::domain::foundation::{
    ChatId, DeviceTag, DomainError, EventDraft, EventEnvelope, MessageId, Sequence, Timestamp,
    UserId,
};
use pulsehub::domain::sync::SyncSession;
use pulsehub::ports::{ConnectionSink, PushFrame};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct RecordingSink {
    frames: Mutex<Vec<PushFrame>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<EventEnvelope> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| match f {
                PushFrame::Event(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn event_sequences(&self) -> Vec<u64> {
        self.events().iter().map(|e| e.sequence.as_u64()).collect()
    }
}

#[async_trait]
impl ConnectionSink for RecordingSink {
    async fn push(&self, frame: PushFrame) -> Result<(), DomainError> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

/// Sink that never completes a push, simulating a wedged client.
struct StalledSink;

#[async_trait]
impl ConnectionSink for StalledSink {
    async fn push(&self, _frame: PushFrame) -> Result<(), DomainError> {
        futures::future::pending::<()>().await;
        unreachable!()
    }
}

struct Core {
    bus: Arc<EventBus>,
    presence: PresenceRegistry,
    unread: Arc<UnreadAggregator>,
    ordering: Arc<ChatOrderingIndex>,
    catchup: Arc<CatchUpCoordinator>,
    dispatcher: Arc<DeliveryDispatcher>,
}

fn realtime_config() -> RealtimeConfig {
    RealtimeConfig {
        retry: RetryConfig {
            max_attempts: 3,
            backoff_ms: 1,
        },
        ..Default::default()
    }
}

async fn build_core() -> Core {
    build_core_with_send_timeout(Duration::from_millis(500)).await
}

async fn build_core_with_send_timeout(send_timeout: Duration) -> Core {
    let config = realtime_config();
    let log = Arc::new(InMemoryEventLog::new());
    let store = Arc::new(InMemoryProjectionStore::new());

    let presence = PresenceRegistry::new(Duration::from_secs(60), send_timeout);
    let unread = Arc::new(UnreadAggregator::new());
    let ordering = Arc::new(ChatOrderingIndex::new());
    let catchup = Arc::new(CatchUpCoordinator::new(log.clone(), store.clone(), &config));
    let dispatcher = Arc::new(DeliveryDispatcher::new(
        presence.clone(),
        unread.clone(),
        ordering.clone(),
        catchup.clone(),
        store.clone(),
        &config,
        Sequence::ZERO,
    ));
    let bus = Arc::new(EventBus::new(log.clone(), config.retry));
    bus.register_mandatory(dispatcher.clone()).await;

    Core {
        bus,
        presence,
        unread,
        ordering,
        catchup,
        dispatcher,
    }
}

fn user(id: i64) -> UserId {
    UserId::new(id)
}

fn chat(id: i64) -> ChatId {
    ChatId::new(id)
}

async fn connect(core: &Core, user_id: UserId) -> (Arc<RecordingSink>, ConnectionHandle) {
    let sink = RecordingSink::new();
    let handle = ConnectionHandle::new(user_id, DeviceTag::new("test"), sink.clone());
    core.presence.connect(handle.clone()).await;
    (sink, handle)
}

async fn send_message(
    core: &Core,
    chat_id: ChatId,
    message_id: i64,
    sender: UserId,
    participants: Vec<UserId>,
) -> EventEnvelope {
    core.bus
        .publish(EventDraft::message_sent(
            chat_id,
            MessageId::new(message_id),
            sender,
            format!("message {}", message_id),
            participants,
        ))
        .await
        .expect("publish should succeed")
}

// =============================================================================
// Live delivery
// =============================================================================

#[tokio::test]
async fn published_messages_reach_online_recipients_in_order() {
    let core = build_core().await;
    let (sink, _) = connect(&core, user(2)).await;

    for id in 1..=3 {
        send_message(&core, chat(1), id, user(1), vec![user(1), user(2)]).await;
    }

    assert_eq!(sink.event_sequences(), vec![1, 2, 3]);
    assert_eq!(core.unread.unread(user(2), chat(1)).await, 3);
    assert_eq!(core.unread.total_unread(user(2)).await, 3);
}

#[tokio::test]
async fn every_device_of_a_user_receives_the_push() {
    let core = build_core().await;
    let (phone, _) = connect(&core, user(2)).await;
    let (laptop, _) = connect(&core, user(2)).await;

    send_message(&core, chat(1), 1, user(1), vec![user(1), user(2)]).await;

    assert_eq!(phone.event_sequences(), vec![1]);
    assert_eq!(laptop.event_sequences(), vec![1]);
    // One unread, not two: counters are per user, not per device.
    assert_eq!(core.unread.unread(user(2), chat(1)).await, 1);
}

// =============================================================================
// Catch-up on reconnect
// =============================================================================

#[tokio::test]
async fn offline_user_catches_up_on_three_missed_messages() {
    let core = build_core().await;

    // User 2 is offline while three messages land in the chat.
    for id in 1..=3 {
        send_message(&core, chat(1), id, user(1), vec![user(1), user(2)]).await;
    }
    assert_eq!(core.unread.unread(user(2), chat(1)).await, 3);

    // Reconnect: the plan replays exactly the three missed events.
    let plan = core
        .catchup
        .on_reconnect(user(2), Sequence::ZERO)
        .await
        .unwrap();
    let (events, high) = match plan {
        CatchUpPlan::Replay { events, high } => (events, high),
        CatchUpPlan::FullResync => panic!("expected replay"),
    };
    assert_eq!(
        events.iter().map(|e| e.sequence.as_u64()).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    // Acknowledge; the next reconnect has nothing to replay.
    core.catchup.ack(user(2), high).await.unwrap();
    match core
        .catchup
        .on_reconnect(user(2), Sequence::ZERO)
        .await
        .unwrap()
    {
        CatchUpPlan::Replay { events, .. } => assert!(events.is_empty()),
        CatchUpPlan::FullResync => panic!("expected replay"),
    }
}

#[tokio::test]
async fn live_events_during_catch_up_merge_without_gaps_or_duplicates() {
    let core = build_core().await;

    // Two events missed while offline.
    send_message(&core, chat(1), 1, user(1), vec![user(2)]).await;
    send_message(&core, chat(1), 2, user(1), vec![user(2)]).await;

    // Reconnect: the connection registers before the catch-up query, so
    // anything published from now on lands in the session buffer.
    let mut session = SyncSession::new();
    session.begin_connect().unwrap();
    let (sink, _) = connect(&core, user(2)).await;
    session.begin_catch_up().unwrap();

    let plan = core
        .catchup
        .on_reconnect(user(2), Sequence::ZERO)
        .await
        .unwrap();
    let (replayed, high) = match plan {
        CatchUpPlan::Replay { events, high } => (events, high),
        CatchUpPlan::FullResync => panic!("expected replay"),
    };

    // A third message arrives mid-replay; the live push hits the sink.
    send_message(&core, chat(1), 3, user(1), vec![user(2)]).await;
    for event in sink.events() {
        session.buffer_live(event).unwrap();
    }

    let flushed = session.complete_catch_up(high).unwrap();

    // Replay + flush covers 1..=3 exactly once, in order.
    let mut seen: Vec<u64> = replayed
        .iter()
        .chain(flushed.iter())
        .map(|e| e.sequence.as_u64())
        .collect();
    let sorted = {
        let mut s = seen.clone();
        s.sort();
        s
    };
    assert_eq!(seen, sorted, "combined stream must be non-decreasing");
    seen.dedup();
    assert_eq!(seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn replay_covers_events_already_buffered_live() {
    let core = build_core().await;
    let mut session = SyncSession::new();
    session.begin_connect().unwrap();
    let (sink, _) = connect(&core, user(2)).await;
    session.begin_catch_up().unwrap();

    // Published after the sink registered but before the catch-up query:
    // the event is both in the log (replayed) and in the sink (buffered).
    send_message(&core, chat(1), 1, user(1), vec![user(2)]).await;
    for event in sink.events() {
        session.buffer_live(event).unwrap();
    }

    let plan = core
        .catchup
        .on_reconnect(user(2), Sequence::ZERO)
        .await
        .unwrap();
    let (replayed, high) = match plan {
        CatchUpPlan::Replay { events, high } => (events, high),
        CatchUpPlan::FullResync => panic!("expected replay"),
    };
    assert_eq!(replayed.len(), 1);

    // The flush drops what the replay already delivered.
    assert!(session.complete_catch_up(high).unwrap().is_empty());
}

// =============================================================================
// Idempotent replay
// =============================================================================

#[tokio::test]
async fn redelivering_the_whole_stream_changes_nothing() {
    let core = build_core().await;
    let mut published = Vec::new();
    for id in 1..=3 {
        published.push(send_message(&core, chat(1), id, user(1), vec![user(1), user(2)]).await);
    }
    published.push(
        core.bus
            .publish(EventDraft::message_read(chat(1), user(2), Sequence::new(2)))
            .await
            .unwrap(),
    );

    let unread_before = core.unread.unread(user(2), chat(1)).await;
    let total_before = core.unread.total_unread(user(2)).await;
    let chats_before = core.ordering.ordered_chats(user(2), 10).await;

    // At-least-once: every event arrives at the dispatcher a second time.
    for event in &published {
        core.dispatcher.consume(event).await.unwrap();
    }

    assert_eq!(core.unread.unread(user(2), chat(1)).await, unread_before);
    assert_eq!(core.unread.total_unread(user(2)).await, total_before);
    assert_eq!(core.ordering.ordered_chats(user(2), 10).await, chats_before);
}

// =============================================================================
// Read receipts across devices
// =============================================================================

#[tokio::test]
async fn concurrent_mark_read_from_two_devices_converges() {
    let core = build_core().await;
    for id in 1..=5 {
        send_message(&core, chat(1), id, user(1), vec![user(1), user(2)]).await;
    }
    assert_eq!(core.unread.total_unread(user(2)).await, 5);

    // Both devices report the same read position at the same time.
    let bus_a = core.bus.clone();
    let bus_b = core.bus.clone();
    let a = tokio::spawn(async move {
        bus_a
            .publish(EventDraft::message_read(chat(1), user(2), Sequence::new(5)))
            .await
    });
    let b = tokio::spawn(async move {
        bus_b
            .publish(EventDraft::message_read(chat(1), user(2), Sequence::new(5)))
            .await
    });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(core.unread.unread(user(2), chat(1)).await, 0);
    assert_eq!(core.unread.total_unread(user(2)).await, 0);
    let summary = core.ordering.summary(user(2), chat(1)).await.unwrap();
    assert_eq!(summary.unread_count, 0);
}

// =============================================================================
// Chat list ordering
// =============================================================================

#[tokio::test]
async fn equal_timestamps_order_by_sequence_descending() {
    let core = build_core().await;
    let at = Timestamp::from_unix_millis(1_700_000_000_000);

    // Three chats, one message each, all stamped the same millisecond.
    for (chat_id, message_id) in [(10, 1), (20, 2), (30, 3)] {
        core.bus
            .publish(
                EventDraft::message_sent(
                    chat(chat_id),
                    MessageId::new(message_id),
                    user(1),
                    "tied",
                    vec![user(2)],
                )
                .at(at),
            )
            .await
            .unwrap();
    }

    let chats: Vec<ChatId> = core
        .ordering
        .ordered_chats(user(2), 10)
        .await
        .into_iter()
        .map(|s| s.chat_id)
        .collect();
    // Sequences 4, 5, 6 would list 6, 5, 4; here 1, 2, 3 list 3, 2, 1.
    assert_eq!(chats, vec![chat(30), chat(20), chat(10)]);
}

// =============================================================================
// Slow connections
// =============================================================================

#[tokio::test]
async fn stalled_connection_is_dropped_but_the_event_survives() {
    let core = build_core_with_send_timeout(Duration::from_millis(50)).await;
    let stalled = ConnectionHandle::new(user(2), DeviceTag::new("wedged"), Arc::new(StalledSink));
    core.presence.connect(stalled).await;
    assert!(core.presence.is_online(user(2)).await);

    send_message(&core, chat(1), 1, user(1), vec![user(1), user(2)]).await;

    // The connection was dropped by the send timeout...
    assert_eq!(core.presence.total_connections().await, 0);
    // ...but the projections advanced and catch-up still has the event.
    assert_eq!(core.unread.unread(user(2), chat(1)).await, 1);
    match core
        .catchup
        .on_reconnect(user(2), Sequence::ZERO)
        .await
        .unwrap()
    {
        CatchUpPlan::Replay { events, .. } => assert_eq!(events.len(), 1),
        CatchUpPlan::FullResync => panic!("expected replay"),
    }
}
