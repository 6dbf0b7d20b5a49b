//! Unread/Counter Aggregator - per-chat and global unread counters.
//!
//! State per (user, chat) is the *set* of unread message sequences plus
//! the last-read sequence. That representation makes every operation
//! idempotent and exact:
//! - replaying a message-created event inserts a sequence already in the
//!   set (no double count);
//! - a read clears exactly the sequences at or below the acknowledged
//!   one, and the global total drops by exactly the number cleared, so a
//!   message racing in between "read" and "clear" is never lost;
//! - a duplicate read notification from a second device is a no-op past
//!   the recorded last-read sequence.
//!
//! Each (user, chat) key has a single owner at a time: keys hash onto a
//! fixed set of async mutex stripes, serializing interleaved
//! increment/clear pairs that would otherwise lose updates. The global
//! total is adjusted while the stripe lock is still held (stripe, then
//! totals), so per-chat state and the total always move together.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use tokio::sync::Mutex;

use crate::domain::foundation::{ChatId, Sequence, UserId};

const STRIPE_COUNT: usize = 16;

#[derive(Debug, Default)]
struct ChatUnread {
    unread: BTreeSet<Sequence>,
    last_read_seq: Sequence,
}

/// Per-chat and global unread counters with exact-delta semantics.
pub struct UnreadAggregator {
    stripes: Vec<Mutex<HashMap<(UserId, ChatId), ChatUnread>>>,
    totals: Mutex<HashMap<UserId, u64>>,
}

impl UnreadAggregator {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            totals: Mutex::new(HashMap::new()),
        }
    }

    fn stripe(&self, user_id: UserId, chat_id: ChatId) -> &Mutex<HashMap<(UserId, ChatId), ChatUnread>> {
        let mut hasher = DefaultHasher::new();
        (user_id, chat_id).hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % STRIPE_COUNT]
    }

    /// Applies a created message: increments unread for every participant
    /// except the sender.
    ///
    /// Returns each participant's resulting unread count for the chat
    /// (the sender's count is returned unchanged so callers can refresh
    /// all summaries uniformly). Idempotent by `message_seq`.
    pub async fn on_message_created(
        &self,
        chat_id: ChatId,
        message_seq: Sequence,
        sender_id: UserId,
        participants: &[UserId],
    ) -> Vec<(UserId, u64)> {
        let mut counts = Vec::with_capacity(participants.len());
        for &user_id in participants {
            let count = if user_id == sender_id {
                self.unread(user_id, chat_id).await
            } else {
                self.increment(chat_id, message_seq, user_id).await
            };
            counts.push((user_id, count));
        }
        counts
    }

    async fn increment(&self, chat_id: ChatId, message_seq: Sequence, user_id: UserId) -> u64 {
        let mut stripe = self.stripe(user_id, chat_id).lock().await;
        let entry = stripe.entry((user_id, chat_id)).or_default();
        // A message at or below the last-read mark was already read
        // on another device; counting it would resurrect it.
        if message_seq <= entry.last_read_seq || !entry.unread.insert(message_seq) {
            return entry.unread.len() as u64;
        }
        let count = entry.unread.len() as u64;
        // Totals nest inside the stripe lock: a racing read of the same
        // key can never observe the insert without its total delta.
        let mut totals = self.totals.lock().await;
        *totals.entry(user_id).or_insert(0) += 1;
        count
    }

    /// Clears unread messages up to and including `up_to_seq`.
    ///
    /// Returns the number of messages actually cleared; the global total
    /// drops by exactly that amount. Re-reading an already-read chat, or
    /// a duplicate notification from a second device, clears nothing.
    pub async fn on_message_read(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        up_to_seq: Sequence,
    ) -> u64 {
        let mut stripe = self.stripe(user_id, chat_id).lock().await;
        let entry = stripe.entry((user_id, chat_id)).or_default();
        if up_to_seq <= entry.last_read_seq {
            return 0;
        }
        let still_unread = entry.unread.split_off(&up_to_seq.next());
        let cleared = entry.unread.len() as u64;
        entry.unread = still_unread;
        entry.last_read_seq = up_to_seq;
        if cleared > 0 {
            // Same stripe-then-totals order as increment, so the cleared
            // sequences always carry their matching total delta.
            let mut totals = self.totals.lock().await;
            if let Some(total) = totals.get_mut(&user_id) {
                *total = total.saturating_sub(cleared);
            }
        }
        cleared
    }

    /// Unread count for one (user, chat).
    pub async fn unread(&self, user_id: UserId, chat_id: ChatId) -> u64 {
        let stripe = self.stripe(user_id, chat_id).lock().await;
        stripe
            .get(&(user_id, chat_id))
            .map(|e| e.unread.len() as u64)
            .unwrap_or(0)
    }

    /// Unread total across all of a user's chats.
    pub async fn total_unread(&self, user_id: UserId) -> u64 {
        self.totals.lock().await.get(&user_id).copied().unwrap_or(0)
    }
}

impl Default for UnreadAggregator {
    fn default() -> Self {
        Self::new()
    }
}
