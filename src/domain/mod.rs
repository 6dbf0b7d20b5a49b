//! Domain layer - pure types and logic, no I/O.

pub mod chat;
pub mod foundation;
pub mod presence;
pub mod sync;
