//! Catch-Up Coordinator - missed-event replay on reconnect.
//!
//! Keeps a per-user [`InboxCursor`] (read through from the projection
//! store, cached in memory) and turns a reconnect into a plan: replay the
//! events after the cursor, or tell the client to fully resync when the
//! gap is too large, too old, or the cursor is degraded.
//!
//! The effective replay start is the further-ahead of the stored cursor
//! and the cursor the client presents, so a client that persisted
//! acknowledgements locally is never re-sent what it already has.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::retry::run_with_retry;
use crate::config::{RealtimeConfig, RetryConfig};
use crate::domain::foundation::{DomainError, EventEnvelope, Sequence, Timestamp, UserId};
use crate::domain::sync::InboxCursor;
use crate::ports::{cursor_key, EventLog, ProjectionStore};

/// What a reconnecting client should do.
#[derive(Debug, Clone)]
pub enum CatchUpPlan {
    /// Replay these events, then acknowledge `high`.
    Replay {
        events: Vec<EventEnvelope>,
        high: Sequence,
    },
    /// The gap is not worth replaying; refetch state wholesale and then
    /// report the resync point.
    FullResync,
}

/// Plans replay on reconnect and tracks per-user cursors.
pub struct CatchUpCoordinator {
    log: Arc<dyn EventLog>,
    store: Arc<dyn ProjectionStore>,
    cursors: RwLock<HashMap<UserId, InboxCursor>>,
    retry: RetryConfig,
    max_events: usize,
    max_age_secs: u64,
}

impl CatchUpCoordinator {
    pub fn new(
        log: Arc<dyn EventLog>,
        store: Arc<dyn ProjectionStore>,
        config: &RealtimeConfig,
    ) -> Self {
        Self {
            log,
            store,
            cursors: RwLock::new(HashMap::new()),
            retry: config.retry,
            max_events: config.catchup_max_events,
            max_age_secs: config.catchup_max_age_secs,
        }
    }

    /// Plans catch-up for a reconnecting user.
    ///
    /// `client_cursor` is the last sequence the client claims to have
    /// acknowledged; replay starts after whichever of the stored and
    /// client cursors is further ahead.
    pub async fn on_reconnect(
        &self,
        user_id: UserId,
        client_cursor: Sequence,
    ) -> Result<CatchUpPlan, DomainError> {
        let cursor = self.load(user_id).await?;
        if cursor.degraded {
            tracing::info!(user_id = %user_id, "cursor degraded, forcing full resync");
            return Ok(CatchUpPlan::FullResync);
        }

        let from = cursor.last_acked_seq.max(client_cursor);
        // One extra row distinguishes "exactly at the limit" from "over".
        let events = run_with_retry(&self.retry, "event_log.for_user_after", || {
            self.log.for_user_after(user_id, from, self.max_events + 1)
        })
        .await?;

        if events.len() > self.max_events {
            tracing::info!(
                user_id = %user_id,
                from = %from,
                limit = self.max_events,
                "missed-event window exceeded, forcing full resync"
            );
            return Ok(CatchUpPlan::FullResync);
        }

        let cutoff = Timestamp::now().minus_secs(self.max_age_secs);
        if events.iter().any(|e| e.occurred_at.is_before(&cutoff)) {
            tracing::info!(
                user_id = %user_id,
                from = %from,
                "missed events older than the replay window, forcing full resync"
            );
            return Ok(CatchUpPlan::FullResync);
        }

        let high = events.last().map(|e| e.sequence).unwrap_or(from);
        Ok(CatchUpPlan::Replay { events, high })
    }

    /// Records a client acknowledgement up to `seq` and persists the
    /// cursor.
    ///
    /// Stale acknowledgements are ignored. If persistence keeps failing
    /// the cursor is marked degraded instead of erroring the connection:
    /// the user stays live and the next reconnect resyncs fully.
    pub async fn ack(&self, user_id: UserId, seq: Sequence) -> Result<(), DomainError> {
        let updated = {
            let mut cursors = self.cursors.write().await;
            let cursor = cursors.entry(user_id).or_default();
            if !cursor.advance(seq) {
                return Ok(());
            }
            *cursor
        };

        if let Err(e) = self.persist(user_id, updated).await {
            tracing::warn!(
                user_id = %user_id,
                seq = %seq,
                error = %e,
                "cursor persistence exhausted retries, marking degraded"
            );
            self.cursors
                .write()
                .await
                .entry(user_id)
                .or_default()
                .mark_degraded();
        }
        Ok(())
    }

    /// Marks a user's cursor degraded; the next reconnect gets a
    /// [`CatchUpPlan::FullResync`].
    pub async fn mark_degraded(&self, user_id: UserId) {
        let cursor = {
            let mut cursors = self.cursors.write().await;
            let cursor = cursors.entry(user_id).or_default();
            cursor.mark_degraded();
            *cursor
        };
        // Persisting the flag is best-effort; the in-memory copy already
        // protects this process, and a lost flag only costs one more
        // degraded replay after a restart.
        if let Err(e) = self.persist(user_id, cursor).await {
            tracing::warn!(user_id = %user_id, error = %e, "failed to persist degraded cursor");
        }
    }

    /// Clears the degraded flag after the client completed a full resync
    /// at `seq`.
    pub async fn mark_resynced(&self, user_id: UserId, seq: Sequence) {
        let cursor = {
            let mut cursors = self.cursors.write().await;
            let cursor = cursors.entry(user_id).or_default();
            cursor.mark_resynced(seq);
            *cursor
        };
        if let Err(e) = self.persist(user_id, cursor).await {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "failed to persist resynced cursor, re-marking degraded"
            );
            self.cursors
                .write()
                .await
                .entry(user_id)
                .or_default()
                .mark_degraded();
        }
    }

    /// Current cursor for a user (read through from the store).
    pub async fn cursor(&self, user_id: UserId) -> Result<InboxCursor, DomainError> {
        self.load(user_id).await
    }

    async fn load(&self, user_id: UserId) -> Result<InboxCursor, DomainError> {
        if let Some(cursor) = self.cursors.read().await.get(&user_id) {
            return Ok(*cursor);
        }

        let key = cursor_key(user_id);
        let stored = run_with_retry(&self.retry, "projection_store.get", || self.store.get(&key))
            .await?;
        let cursor = match stored {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "stored cursor unreadable, starting degraded"
                );
                let mut cursor = InboxCursor::new();
                cursor.mark_degraded();
                cursor
            }),
            None => InboxCursor::new(),
        };

        // Another task may have loaded and advanced it meanwhile; keep
        // whichever copy landed first.
        let mut cursors = self.cursors.write().await;
        Ok(*cursors.entry(user_id).or_insert(cursor))
    }

    async fn persist(&self, user_id: UserId, cursor: InboxCursor) -> Result<(), DomainError> {
        let value = serde_json::to_value(cursor).expect("cursor serialization is infallible");
        let key = cursor_key(user_id);
        run_with_retry(&self.retry, "projection_store.put", || {
            self.store.put(&key, value.clone())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryEventLog, InMemoryProjectionStore};
    use crate::domain::foundation::{EventDraft, EventKind};
    use serde_json::json;

    fn user(id: i64) -> UserId {
        UserId::new(id)
    }

    fn seq(n: u64) -> Sequence {
        Sequence::new(n)
    }

    fn event_for(user_id: UserId, sequence: u64) -> EventEnvelope {
        EventDraft::new(EventKind::PostLiked, vec![user_id], json!({})).stamp(seq(sequence))
    }

    fn config(max_events: usize) -> RealtimeConfig {
        RealtimeConfig {
            catchup_max_events: max_events,
            retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 1,
            },
            ..Default::default()
        }
    }

    async fn coordinator_with(
        max_events: usize,
        events: Vec<EventEnvelope>,
    ) -> (CatchUpCoordinator, Arc<InMemoryProjectionStore>) {
        let log = Arc::new(InMemoryEventLog::new());
        for event in events {
            log.append(event).await.unwrap();
        }
        let store = Arc::new(InMemoryProjectionStore::new());
        (
            CatchUpCoordinator::new(log, store.clone(), &config(max_events)),
            store,
        )
    }

    #[tokio::test]
    async fn fresh_user_with_no_events_replays_nothing() {
        let (coordinator, _) = coordinator_with(10, vec![]).await;

        match coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap() {
            CatchUpPlan::Replay { events, high } => {
                assert!(events.is_empty());
                assert_eq!(high, Sequence::ZERO);
            }
            CatchUpPlan::FullResync => panic!("expected replay"),
        }
    }

    #[tokio::test]
    async fn replay_covers_events_after_the_cursor() {
        let events = (1..=5).map(|n| event_for(user(1), n)).collect();
        let (coordinator, _) = coordinator_with(10, events).await;
        coordinator.ack(user(1), seq(2)).await.unwrap();

        match coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap() {
            CatchUpPlan::Replay { events, high } => {
                let seqs: Vec<u64> = events.iter().map(|e| e.sequence.as_u64()).collect();
                assert_eq!(seqs, vec![3, 4, 5]);
                assert_eq!(high, seq(5));
            }
            CatchUpPlan::FullResync => panic!("expected replay"),
        }
    }

    #[tokio::test]
    async fn client_cursor_ahead_of_stored_narrows_the_replay() {
        let events = (1..=5).map(|n| event_for(user(1), n)).collect();
        let (coordinator, _) = coordinator_with(10, events).await;
        coordinator.ack(user(1), seq(1)).await.unwrap();

        match coordinator.on_reconnect(user(1), seq(4)).await.unwrap() {
            CatchUpPlan::Replay { events, high } => {
                let seqs: Vec<u64> = events.iter().map(|e| e.sequence.as_u64()).collect();
                assert_eq!(seqs, vec![5]);
                assert_eq!(high, seq(5));
            }
            CatchUpPlan::FullResync => panic!("expected replay"),
        }
    }

    #[tokio::test]
    async fn oversized_gap_forces_full_resync() {
        let events = (1..=5).map(|n| event_for(user(1), n)).collect();
        let (coordinator, _) = coordinator_with(3, events).await;

        assert!(matches!(
            coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap(),
            CatchUpPlan::FullResync
        ));
    }

    #[tokio::test]
    async fn gap_exactly_at_the_limit_still_replays() {
        let events = (1..=3).map(|n| event_for(user(1), n)).collect();
        let (coordinator, _) = coordinator_with(3, events).await;

        assert!(matches!(
            coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap(),
            CatchUpPlan::Replay { .. }
        ));
    }

    #[tokio::test]
    async fn events_older_than_the_window_force_full_resync() {
        let mut config = config(10);
        config.catchup_max_age_secs = 60;
        let log = Arc::new(InMemoryEventLog::new());
        let stale = EventDraft::new(EventKind::PostLiked, vec![user(1)], json!({}))
            .at(Timestamp::now().minus_secs(3_600))
            .stamp(seq(1));
        log.append(stale).await.unwrap();
        let store = Arc::new(InMemoryProjectionStore::new());
        let coordinator = CatchUpCoordinator::new(log, store, &config);

        assert!(matches!(
            coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap(),
            CatchUpPlan::FullResync
        ));
    }

    #[tokio::test]
    async fn degraded_cursor_forces_full_resync_until_resynced() {
        let events = vec![event_for(user(1), 1)];
        let (coordinator, _) = coordinator_with(10, events).await;

        coordinator.mark_degraded(user(1)).await;
        assert!(matches!(
            coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap(),
            CatchUpPlan::FullResync
        ));

        coordinator.mark_resynced(user(1), seq(1)).await;
        assert!(matches!(
            coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap(),
            CatchUpPlan::Replay { .. }
        ));
    }

    #[tokio::test]
    async fn ack_persists_the_cursor() {
        let (coordinator, store) = coordinator_with(10, vec![]).await;
        coordinator.ack(user(1), seq(7)).await.unwrap();

        let stored = store.get(&cursor_key(user(1))).await.unwrap().unwrap();
        let cursor: InboxCursor = serde_json::from_value(stored).unwrap();
        assert_eq!(cursor.last_acked_seq, seq(7));
        assert!(!cursor.degraded);
    }

    #[tokio::test]
    async fn stale_ack_is_ignored() {
        let (coordinator, _) = coordinator_with(10, vec![]).await;
        coordinator.ack(user(1), seq(7)).await.unwrap();
        coordinator.ack(user(1), seq(3)).await.unwrap();

        assert_eq!(coordinator.cursor(user(1)).await.unwrap().last_acked_seq, seq(7));
    }

    #[tokio::test]
    async fn cursor_survives_via_the_store_across_instances() {
        let log = Arc::new(InMemoryEventLog::new());
        for n in 1..=3 {
            log.append(event_for(user(1), n)).await.unwrap();
        }
        let store = Arc::new(InMemoryProjectionStore::new());

        let first = CatchUpCoordinator::new(log.clone(), store.clone(), &config(10));
        first.ack(user(1), seq(2)).await.unwrap();

        let second = CatchUpCoordinator::new(log, store, &config(10));
        match second.on_reconnect(user(1), Sequence::ZERO).await.unwrap() {
            CatchUpPlan::Replay { events, .. } => {
                let seqs: Vec<u64> = events.iter().map(|e| e.sequence.as_u64()).collect();
                assert_eq!(seqs, vec![3]);
            }
            CatchUpPlan::FullResync => panic!("expected replay"),
        }
    }

    #[tokio::test]
    async fn transient_store_failures_are_retried() {
        let log = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryProjectionStore::new());
        store.fail_next_puts(2);
        let coordinator = CatchUpCoordinator::new(log, store, &config(10));

        coordinator.ack(user(1), seq(4)).await.unwrap();
        assert!(!coordinator.cursor(user(1)).await.unwrap().degraded);
    }

    #[tokio::test]
    async fn persistent_store_failure_degrades_instead_of_erroring() {
        let log = Arc::new(InMemoryEventLog::new());
        let store = Arc::new(InMemoryProjectionStore::new());
        store.fail_next_puts(100);
        let coordinator = CatchUpCoordinator::new(log, store, &config(10));

        // The ack itself succeeds; only the durability is lost.
        coordinator.ack(user(1), seq(4)).await.unwrap();

        assert!(coordinator.cursor(user(1)).await.unwrap().degraded);
        assert!(matches!(
            coordinator.on_reconnect(user(1), Sequence::ZERO).await.unwrap(),
            CatchUpPlan::FullResync
        ));
    }
}
