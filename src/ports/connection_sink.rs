//! ConnectionSink port - the push side of one live connection.
//!
//! The presence registry holds one sink per connection and fans frames
//! out through it. A sink push may block (slow client); callers wrap it
//! in the per-connection send timeout so one stalled socket cannot hold
//! up dispatch to siblings.

use async_trait::async_trait;

use crate::domain::foundation::{ChatId, DomainError, EventEnvelope, UserId};

/// A frame pushed to a live connection.
///
/// The transport adapter maps these onto its wire format. Presence
/// changes travel on the registry's broadcast stream instead; the
/// transport subscribes to it directly.
#[derive(Debug, Clone)]
pub enum PushFrame {
    /// A sequenced domain event for this user.
    Event(EventEnvelope),
    /// Ephemeral typing indicator; never sequenced, never replayed.
    Typing { chat_id: ChatId, user_id: UserId },
    /// The incremental stream broke; refetch authoritative state from the
    /// query layer and reconnect.
    Resync,
}

/// Port for pushing frames to one connection.
///
/// Implementations return `ErrorCode::ConnectionClosed` once the peer is
/// gone; they do not enforce the send timeout themselves.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn push(&self, frame: PushFrame) -> Result<(), DomainError>;
}
