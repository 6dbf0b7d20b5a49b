//! WebSocket message types for the realtime delivery protocol.
//!
//! Defines the protocol between server and connected clients:
//! - Server → Client: connection status, catch-up replay, sequenced
//!   events, typing/presence indicators, forced resync, errors, pings
//! - Client → Server: acknowledgements, read receipts, typing, pings

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{ChatId, EventEnvelope, Sequence, Timestamp, UserId};
use crate::domain::presence::PresenceChange;
use crate::ports::PushFrame;

// ============================================
// Server → Client Messages
// ============================================

/// All message types that can be sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection established; catch-up replay follows.
    Connected(ConnectedMessage),

    /// Missed events since the client's cursor. The client applies them
    /// and acknowledges `high` to go live.
    #[serde(rename = "catch_up")]
    CatchUp(CatchUpMessage),

    /// One sequenced domain event, pushed live.
    Event(EventEnvelope),

    /// Someone is typing in a chat. Ephemeral; never replayed.
    Typing(TypingMessage),

    /// Another user went online or offline, forwarded from the presence
    /// registry's change stream.
    Presence(PresenceChange),

    /// The incremental stream cannot be resumed. The client refetches
    /// authoritative state from the query layer, then reports the
    /// sequence it is synced at.
    Resync,

    /// Error occurred.
    Error(ErrorMessage),

    /// Heartbeat response.
    Pong,
}

/// Sent once after the upgrade completes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMessage {
    pub user_id: UserId,
    pub connection_id: String,
    pub timestamp: String,
}

/// Catch-up replay batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpMessage {
    pub events: Vec<EventEnvelope>,
    /// Highest sequence in the batch; acknowledge this to go live.
    pub high: Sequence,
}

/// Typing indicator fan-out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

/// Error message sent to client.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Timestamp::now().as_datetime().to_rfc3339(),
        }
    }
}

impl From<PushFrame> for ServerMessage {
    fn from(frame: PushFrame) -> Self {
        match frame {
            PushFrame::Event(event) => ServerMessage::Event(event),
            PushFrame::Typing { chat_id, user_id } => {
                ServerMessage::Typing(TypingMessage { chat_id, user_id })
            }
            PushFrame::Resync => ServerMessage::Resync,
        }
    }
}

// ============================================
// Client → Server Messages
// ============================================

/// All message types that can be received from client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The client has applied everything up to `seq`. Ends catch-up when
    /// it covers the replay high-water mark; advances the cursor any time.
    Ack { seq: Sequence },

    /// The client finished a full resync and is consistent at `seq`.
    Resynced { seq: Sequence },

    /// The user read a chat up to `seq`; published as a sequenced
    /// `message.read` event so every device converges.
    MarkRead { chat_id: ChatId, up_to_seq: Sequence },

    /// The user is typing. Carries the chat participants because chat
    /// membership lives upstream; the gateway validates it before us.
    Typing {
        chat_id: ChatId,
        participants: Vec<UserId>,
    },

    /// The user stopped typing (sent a message or cleared the draft).
    TypingStopped { chat_id: ChatId },

    /// Heartbeat request.
    Ping,
}
