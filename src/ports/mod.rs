//! Ports - interfaces to external collaborators.
//!
//! The delivery core talks to persistence and transport exclusively
//! through these traits, keeping it portable to any storage engine or
//! socket layer.

mod connection_sink;
mod event_log;
mod projection_store;

pub use connection_sink::{ConnectionSink, PushFrame};
pub use event_log::EventLog;
pub use projection_store::{chat_summary_key, cursor_key, ProjectionStore};
