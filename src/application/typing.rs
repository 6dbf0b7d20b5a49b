//! Typing indicator store - ephemeral per-chat typing state.
//!
//! Typing never touches the event bus: no sequence, no log, no replay. A
//! set indicator expires after a TTL unless refreshed, reads filter out
//! expired entries lazily, and a periodic sweep reclaims memory for chats
//! nobody is typing in anymore. Losing typing state is always acceptable.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::application::PresenceRegistry;
use crate::domain::foundation::{ChatId, Timestamp, UserId};
use crate::ports::PushFrame;

/// Ephemeral typing indicators with TTL expiry.
pub struct TypingStore {
    /// chat -> typist -> expiry.
    chats: RwLock<HashMap<ChatId, HashMap<UserId, Timestamp>>>,
    presence: PresenceRegistry,
    ttl: Duration,
}

impl TypingStore {
    pub fn new(presence: PresenceRegistry, ttl: Duration) -> Self {
        Self {
            chats: RwLock::new(HashMap::new()),
            presence,
            ttl,
        }
    }

    /// Records that `user_id` is typing in `chat_id` and fans the
    /// indicator out to the other online participants. Refreshing an
    /// active indicator restarts its TTL.
    pub async fn set_typing(&self, chat_id: ChatId, user_id: UserId, participants: &[UserId]) {
        let expires_at = Timestamp::now().plus_millis(self.ttl.as_millis() as u64);
        {
            let mut chats = self.chats.write().await;
            chats.entry(chat_id).or_default().insert(user_id, expires_at);
        }

        let online = self.presence.online_among(participants).await;
        for peer in online {
            if peer == user_id {
                continue;
            }
            self.presence
                .push_to_user(peer, PushFrame::Typing { chat_id, user_id })
                .await;
        }
    }

    /// Removes `user_id`'s indicator in `chat_id` before its TTL, e.g.
    /// when the message was sent or the draft cleared.
    pub async fn clear_typing(&self, chat_id: ChatId, user_id: UserId) {
        let mut chats = self.chats.write().await;
        if let Some(typists) = chats.get_mut(&chat_id) {
            typists.remove(&user_id);
            if typists.is_empty() {
                chats.remove(&chat_id);
            }
        }
    }

    /// Who is currently typing in a chat. Expired indicators are never
    /// returned, whether or not the sweeper has run.
    pub async fn typing_users(&self, chat_id: ChatId) -> Vec<UserId> {
        let now = Timestamp::now();
        let chats = self.chats.read().await;
        let mut users: Vec<UserId> = chats
            .get(&chat_id)
            .map(|typists| {
                typists
                    .iter()
                    .filter(|(_, expires_at)| now.is_before(expires_at))
                    .map(|(user_id, _)| *user_id)
                    .collect()
            })
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Drops expired indicators and empty chats. Run periodically; reads
    /// are correct without it.
    pub async fn sweep(&self) {
        let now = Timestamp::now();
        let mut chats = self.chats.write().await;
        chats.retain(|_, typists| {
            typists.retain(|_, expires_at| now.is_before(expires_at));
            !typists.is_empty()
        });
    }
}
