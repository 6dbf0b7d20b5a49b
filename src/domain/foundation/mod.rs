//! Foundation module - shared domain primitives.
//!
//! Identifiers, timestamps, sequence numbers, the event envelope, and the
//! error taxonomy that form the vocabulary of the delivery core.

mod errors;
mod events;
mod ids;
mod sequence;
mod timestamp;

pub use errors::{DomainError, ErrorCode};
pub use events::{
    EventDraft, EventEnvelope, EventKind, MessageReadPayload, MessageSentPayload,
};
pub use ids::{ChatId, ConnectionId, DeviceTag, MessageId, UserId};
pub use sequence::{Sequence, SequenceAllocator};
pub use timestamp::Timestamp;
