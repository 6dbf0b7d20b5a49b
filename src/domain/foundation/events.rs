//! Event envelope and payload types.
//!
//! Domain events are immutable and append-only: upstream services describe
//! what happened in an [`EventDraft`], the bus stamps a global [`Sequence`]
//! at publish time, and from then on the resulting [`EventEnvelope`] never
//! changes. The sequence provides total order and makes replay idempotent.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{ChatId, MessageId, Sequence, Timestamp, UserId};

/// The kinds of domain event the delivery core routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A chat message was stored.
    #[serde(rename = "message.sent")]
    MessageSent,
    /// A user read a chat up to some message.
    #[serde(rename = "message.read")]
    MessageRead,
    /// Someone asked to connect with the target user.
    #[serde(rename = "connection.requested")]
    ConnectionRequested,
    /// A connection request was accepted.
    #[serde(rename = "connection.accepted")]
    ConnectionAccepted,
    /// Someone liked the target user's post.
    #[serde(rename = "post.liked")]
    PostLiked,
    /// Someone commented on the target user's post.
    #[serde(rename = "comment.added")]
    CommentAdded,
}

impl EventKind {
    /// Stable string form, used for routing and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MessageSent => "message.sent",
            EventKind::MessageRead => "message.read",
            EventKind::ConnectionRequested => "connection.requested",
            EventKind::ConnectionAccepted => "connection.accepted",
            EventKind::PostLiked => "post.liked",
            EventKind::CommentAdded => "comment.added",
        }
    }

    /// All kinds, for registering catch-all subscribers.
    pub fn all() -> &'static [EventKind] {
        &[
            EventKind::MessageSent,
            EventKind::MessageRead,
            EventKind::ConnectionRequested,
            EventKind::ConnectionAccepted,
            EventKind::PostLiked,
            EventKind::CommentAdded,
        ]
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of a `message.sent` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSentPayload {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub preview: String,
}

/// Payload of a `message.read` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadPayload {
    pub reader_id: UserId,
    /// Highest message sequence the reader has seen in the chat.
    pub up_to_seq: Sequence,
}

/// An event as described by an upstream domain service, before the bus has
/// assigned its place in the global order.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: EventKind,
    pub target_user_ids: Vec<UserId>,
    pub chat_id: Option<ChatId>,
    pub occurred_at: Timestamp,
    pub payload: JsonValue,
}

impl EventDraft {
    /// Creates a draft with an arbitrary payload.
    pub fn new(kind: EventKind, target_user_ids: Vec<UserId>, payload: JsonValue) -> Self {
        Self {
            kind,
            target_user_ids,
            chat_id: None,
            occurred_at: Timestamp::now(),
            payload,
        }
    }

    /// Sets the chat this event belongs to.
    pub fn in_chat(mut self, chat_id: ChatId) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    /// Overrides the occurrence time (upstream services report their own).
    pub fn at(mut self, occurred_at: Timestamp) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Draft for a stored chat message. Targets every participant,
    /// including the sender (their other devices want the message too).
    pub fn message_sent(
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        preview: impl Into<String>,
        participants: Vec<UserId>,
    ) -> Self {
        let payload = MessageSentPayload {
            message_id,
            sender_id,
            preview: preview.into(),
        };
        Self::new(
            EventKind::MessageSent,
            participants,
            serde_json::to_value(payload).expect("payload serialization is infallible"),
        )
        .in_chat(chat_id)
    }

    /// Draft for a read receipt. Targets the reader (all devices must
    /// converge on the same unread count).
    pub fn message_read(chat_id: ChatId, reader_id: UserId, up_to_seq: Sequence) -> Self {
        let payload = MessageReadPayload {
            reader_id,
            up_to_seq,
        };
        Self::new(
            EventKind::MessageRead,
            vec![reader_id],
            serde_json::to_value(payload).expect("payload serialization is infallible"),
        )
        .in_chat(chat_id)
    }

    /// Stamps the draft with its global sequence, producing the immutable
    /// envelope.
    pub fn stamp(self, sequence: Sequence) -> EventEnvelope {
        EventEnvelope {
            sequence,
            kind: self.kind,
            target_user_ids: self.target_user_ids,
            chat_id: self.chat_id,
            occurred_at: self.occurred_at,
            payload: self.payload,
        }
    }
}

/// An immutable, globally sequenced domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: Sequence,
    pub kind: EventKind,
    pub target_user_ids: Vec<UserId>,
    pub chat_id: Option<ChatId>,
    pub occurred_at: Timestamp,
    pub payload: JsonValue,
}

impl EventEnvelope {
    /// Whether this event targets the given user.
    pub fn targets(&self, user_id: UserId) -> bool {
        self.target_user_ids.contains(&user_id)
    }

    /// Parses the payload as `message.sent`, if that is this event's kind.
    pub fn message_sent_payload(&self) -> Option<MessageSentPayload> {
        if self.kind != EventKind::MessageSent {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Parses the payload as `message.read`, if that is this event's kind.
    pub fn message_read_payload(&self) -> Option<MessageReadPayload> {
        if self.kind != EventKind::MessageRead {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}
