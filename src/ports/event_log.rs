//! EventLog port - append-only event persistence keyed by sequence.
//!
//! The log is the durability backbone: every published event lands here
//! before any consumer sees it, so catch-up can always reconstruct what a
//! disconnected user missed.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, EventEnvelope, Sequence, UserId};

/// Port for the append-only event log.
///
/// Implementations must:
/// - reject nothing on replayed appends (appending the same sequence twice
///   keeps the first copy; events are immutable)
/// - return ranges in ascending sequence order
/// - report transient failures as `ErrorCode::TransientPersistence` so
///   callers retry with bounded backoff
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event.
    async fn append(&self, event: EventEnvelope) -> Result<(), DomainError>;

    /// Events with sequence strictly greater than `after`, ascending,
    /// at most `limit`.
    async fn range_after(
        &self,
        after: Sequence,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, DomainError>;

    /// Events targeting `user_id` with sequence strictly greater than
    /// `after`, ascending, at most `limit`.
    ///
    /// A database-backed implementation indexes the target-user column;
    /// this is the catch-up hot path.
    async fn for_user_after(
        &self,
        user_id: UserId,
        after: Sequence,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, DomainError>;

    /// Highest appended sequence, `Sequence::ZERO` when empty.
    async fn head(&self) -> Result<Sequence, DomainError>;
}
