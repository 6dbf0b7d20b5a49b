//! Application layer - the seven services of the delivery core.
//!
//! Flow: a domain action is published on the [`bus::EventBus`] with a
//! monotonic sequence, the [`dispatcher::DeliveryDispatcher`] resolves
//! recipients, updates the unread/ordering projections, and pushes to
//! live connections held by the [`presence::PresenceRegistry`]; offline
//! recipients rely on the [`catchup::CatchUpCoordinator`] at next connect.

pub mod bus;
pub mod catchup;
pub mod dispatcher;
pub mod ordering;
pub mod presence;
mod retry;
pub mod typing;
pub mod unread;

pub use bus::{EventBus, EventConsumer};
pub use catchup::{CatchUpCoordinator, CatchUpPlan};
pub use dispatcher::DeliveryDispatcher;
pub use ordering::ChatOrderingIndex;
pub use presence::{ConnectionHandle, PresenceRegistry};
pub use typing::TypingStore;
pub use unread::UnreadAggregator;
