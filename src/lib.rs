//! PulseHub - Real-time delivery core for the PulseHub professional network.
//!
//! Tracks live connections, fans out chat messages and activity
//! notifications with per-user ordering and at-least-once delivery, and
//! lets reconnecting clients deterministically catch up on missed events.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
