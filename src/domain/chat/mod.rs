//! Chat summary value objects.
//!
//! A [`ChatSummary`] is one row of a user's chat list: preview and time of
//! the latest message, the unread count, and the mute/archive flags. It is
//! a projection maintained incrementally by the ordering index and unread
//! aggregator, and persisted per (user, chat) key.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ChatId, Sequence, Timestamp};

/// Per-(user, chat) summary backing the chat list UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub last_message_preview: String,
    pub last_message_at: Timestamp,
    /// Sequence of the latest applied message; breaks timestamp ties and
    /// makes replay idempotent.
    pub last_message_seq: Sequence,
    pub unread_count: u64,
    pub muted: bool,
    pub archived: bool,
}

impl ChatSummary {
    /// Fresh entry for a chat's first observed message.
    pub fn new(chat_id: ChatId, preview: impl Into<String>, at: Timestamp, seq: Sequence) -> Self {
        Self {
            chat_id,
            last_message_preview: preview.into(),
            last_message_at: at,
            last_message_seq: seq,
            unread_count: 0,
            muted: false,
            archived: false,
        }
    }

    /// Applies a newer message to the summary.
    ///
    /// `last_message_at` never decreases: an event carrying an earlier
    /// upstream timestamp (clock skew) keeps the current time while still
    /// taking the new preview and sequence. A message to an archived chat
    /// un-archives it; the muted flag is untouched.
    ///
    /// Returns false (and leaves the summary unchanged) when the sequence
    /// is not newer than the last applied one, which makes replay a no-op.
    pub fn apply_message(
        &mut self,
        preview: impl Into<String>,
        at: Timestamp,
        seq: Sequence,
    ) -> bool {
        if seq <= self.last_message_seq {
            return false;
        }
        self.last_message_preview = preview.into();
        if at > self.last_message_at {
            self.last_message_at = at;
        }
        self.last_message_seq = seq;
        self.archived = false;
        true
    }
}
