//! ProjectionStore port - per-key persistence for derived state.
//!
//! Chat summaries and inbox cursors are projections: derived from the
//! event stream, rebuildable, but persisted so a restart does not lose
//! counters for users with nobody connected. The store is a plain keyed
//! get/put; single-owner-per-key serialization happens in the services
//! that own each key space (striped locks), so a store implementation
//! never sees interleaved writers for one key.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::domain::foundation::{ChatId, DomainError, UserId};

/// Port for the per-key projection store.
///
/// Implementations report transient failures as
/// `ErrorCode::TransientPersistence`; callers retry with bounded backoff
/// and escalate exhaustion to a degraded cursor.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Reads the value at `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, DomainError>;

    /// Writes the value at `key`, replacing any previous value.
    async fn put(&self, key: &str, value: JsonValue) -> Result<(), DomainError>;
}

/// Key of the persisted `ChatSummary` for (user, chat).
pub fn chat_summary_key(user_id: UserId, chat_id: ChatId) -> String {
    format!("user:{}:chat:{}", user_id, chat_id)
}

/// Key of the persisted `InboxCursor` for a user.
pub fn cursor_key(user_id: UserId) -> String {
    format!("user:{}:cursor", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_user() {
        assert_eq!(
            chat_summary_key(UserId::new(3), ChatId::new(9)),
            "user:3:chat:9"
        );
        assert_eq!(cursor_key(UserId::new(3)), "user:3:cursor");
    }
}
