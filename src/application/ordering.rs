//! Chat Ordering Index - each user's chat list, most recent first.
//!
//! Per user, an ordered map keyed by (last activity time, sequence) points
//! at chat summaries. Moving a chat to the top on new activity is a remove
//! and re-insert of its key, so reads never sort. Sequence breaks
//! timestamp ties: of two messages stamped the same millisecond, the later
//! published one wins the top slot, and every replica that applies the
//! same events renders the same list.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use tokio::sync::Mutex;

use crate::domain::chat::ChatSummary;
use crate::domain::foundation::{ChatId, Sequence, Timestamp, UserId};

const STRIPE_COUNT: usize = 16;

/// Recency key: later time first, sequence breaking ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    at: Timestamp,
    seq: Sequence,
}

#[derive(Debug, Default)]
struct UserChats {
    summaries: HashMap<ChatId, ChatSummary>,
    order: BTreeMap<OrderKey, ChatId>,
}

impl UserChats {
    fn key_of(summary: &ChatSummary) -> OrderKey {
        OrderKey {
            at: summary.last_message_at,
            seq: summary.last_message_seq,
        }
    }

    fn reposition(&mut self, chat_id: ChatId, old_key: Option<OrderKey>) {
        if let Some(key) = old_key {
            self.order.remove(&key);
        }
        if let Some(summary) = self.summaries.get(&chat_id) {
            self.order.insert(Self::key_of(summary), chat_id);
        }
    }
}

/// Maintains every user's recency-ordered chat list.
pub struct ChatOrderingIndex {
    stripes: Vec<Mutex<HashMap<UserId, UserChats>>>,
}

impl ChatOrderingIndex {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn stripe(&self, user_id: UserId) -> &Mutex<HashMap<UserId, UserChats>> {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % STRIPE_COUNT]
    }

    /// Applies a created message to one user's list: bumps the chat to the
    /// top, updates preview/time, and records the caller-supplied unread
    /// count.
    ///
    /// Returns the updated summary, or `None` when the message sequence is
    /// not newer than the one already applied (replay).
    pub async fn on_message_created(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        preview: &str,
        at: Timestamp,
        seq: Sequence,
        unread_count: u64,
    ) -> Option<ChatSummary> {
        let mut stripe = self.stripe(user_id).lock().await;
        let chats = stripe.entry(user_id).or_default();

        match chats.summaries.get_mut(&chat_id) {
            Some(summary) => {
                let old_key = UserChats::key_of(summary);
                if !summary.apply_message(preview, at, seq) {
                    return None;
                }
                summary.unread_count = unread_count;
                let updated = summary.clone();
                chats.reposition(chat_id, Some(old_key));
                Some(updated)
            }
            None => {
                let mut summary = ChatSummary::new(chat_id, preview, at, seq);
                summary.unread_count = unread_count;
                chats.summaries.insert(chat_id, summary.clone());
                chats.reposition(chat_id, None);
                Some(summary)
            }
        }
    }

    /// Overwrites the unread count shown on a chat row. Position is
    /// untouched; reading a chat does not move it.
    ///
    /// Returns the updated summary, `None` for an unknown chat.
    pub async fn set_unread(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        unread_count: u64,
    ) -> Option<ChatSummary> {
        let mut stripe = self.stripe(user_id).lock().await;
        let summary = stripe.get_mut(&user_id)?.summaries.get_mut(&chat_id)?;
        summary.unread_count = unread_count;
        Some(summary.clone())
    }

    /// Sets the muted flag. Muted chats keep their position and counters;
    /// only notification fan-out treats them differently.
    pub async fn set_muted(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        muted: bool,
    ) -> Option<ChatSummary> {
        let mut stripe = self.stripe(user_id).lock().await;
        let summary = stripe.get_mut(&user_id)?.summaries.get_mut(&chat_id)?;
        summary.muted = muted;
        Some(summary.clone())
    }

    /// Sets the archived flag. Archived chats stay indexed (a new message
    /// un-archives them) but are filtered out of [`Self::ordered_chats`].
    pub async fn set_archived(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        archived: bool,
    ) -> Option<ChatSummary> {
        let mut stripe = self.stripe(user_id).lock().await;
        let summary = stripe.get_mut(&user_id)?.summaries.get_mut(&chat_id)?;
        summary.archived = archived;
        Some(summary.clone())
    }

    /// The user's chat list, most recent activity first, archived chats
    /// omitted. `limit` caps the page size.
    pub async fn ordered_chats(&self, user_id: UserId, limit: usize) -> Vec<ChatSummary> {
        let stripe = self.stripe(user_id).lock().await;
        let Some(chats) = stripe.get(&user_id) else {
            return Vec::new();
        };
        chats
            .order
            .iter()
            .rev()
            .filter_map(|(_, chat_id)| chats.summaries.get(chat_id))
            .filter(|summary| !summary.archived)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Current summary for one (user, chat).
    pub async fn summary(&self, user_id: UserId, chat_id: ChatId) -> Option<ChatSummary> {
        let stripe = self.stripe(user_id).lock().await;
        stripe.get(&user_id)?.summaries.get(&chat_id).cloned()
    }
}

impl Default for ChatOrderingIndex {
    fn default() -> Self {
        Self::new()
    }
}
