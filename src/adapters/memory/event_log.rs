//! In-memory append-only event log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, EventEnvelope, Sequence, UserId};
use crate::ports::EventLog;

/// Event log backed by an ordered in-process map.
pub struct InMemoryEventLog {
    events: RwLock<BTreeMap<Sequence, EventEnvelope>>,
    fail_appends: AtomicUsize,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(BTreeMap::new()),
            fail_appends: AtomicUsize::new(0),
        }
    }

    /// Makes the next `n` appends fail transiently. Test hook for the
    /// publisher's retry path.
    pub fn fail_next_appends(&self, n: usize) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.fail_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: EventEnvelope) -> Result<(), DomainError> {
        if self.take_failure() {
            return Err(DomainError::transient("injected append failure"));
        }
        let mut events = self.events.write().await;
        // Events are immutable; a replayed append keeps the first copy.
        events.entry(event.sequence).or_insert(event);
        Ok(())
    }

    async fn range_after(
        &self,
        after: Sequence,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let events = self.events.read().await;
        Ok(events
            .range(after.next()..)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn for_user_after(
        &self,
        user_id: UserId,
        after: Sequence,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let events = self.events.read().await;
        Ok(events
            .range(after.next()..)
            .filter(|(_, e)| e.targets(user_id))
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn head(&self) -> Result<Sequence, DomainError> {
        let events = self.events.read().await;
        Ok(events
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Sequence::ZERO))
    }
}
