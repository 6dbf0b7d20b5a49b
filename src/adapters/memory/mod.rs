//! In-memory adapter implementations.
//!
//! Back the event log and projection store ports with process-local maps.
//! Used as the default wiring for single-node deployments and in tests,
//! where the failure-injection hooks exercise the retry and degradation
//! paths without a real database.

mod event_log;
mod projection_store;

pub use event_log::InMemoryEventLog;
pub use projection_store::InMemoryProjectionStore;
