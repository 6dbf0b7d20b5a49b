//! Presence value objects.
//!
//! A user is Online iff they have at least one live connection. The
//! Offline transition is debounced: it fires only after a grace window
//! elapses with zero connections, so a page refresh never flaps presence.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, UserId};

/// Whether a user is reachable over at least one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Observable presence of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub status: PresenceStatus,
    /// Recorded when the last connection's grace window expires.
    pub last_seen_at: Option<Timestamp>,
    pub active_connection_count: usize,
}

impl PresenceState {
    /// The state of a user the registry has never seen.
    pub fn offline() -> Self {
        Self {
            status: PresenceStatus::Offline,
            last_seen_at: None,
            active_connection_count: 0,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}

/// A presence transition, emitted to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_user_is_offline_with_no_last_seen() {
        let state = PresenceState::offline();
        assert!(!state.is_online());
        assert!(state.last_seen_at.is_none());
        assert_eq!(state.active_connection_count, 0);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PresenceStatus::Online).unwrap(),
            "\"online\""
        );
    }
}
