//! Adapter implementations of the ports.
//!
//! `memory` backs the persistence ports with process-local maps;
//! `websocket` is the axum transport that turns live connections into
//! [`crate::ports::ConnectionSink`]s.

pub mod memory;
pub mod websocket;
