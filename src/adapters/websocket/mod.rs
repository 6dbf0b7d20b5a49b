//! WebSocket transport adapter.
//!
//! Maps the delivery core onto one socket per device: the upgrade handler
//! owns the connection lifecycle and the sync session, `messages` defines
//! the wire protocol, and `connection` adapts the outbound half of the
//! socket into a [`crate::ports::ConnectionSink`] with a bounded queue.

mod connection;
mod handler;
mod messages;

pub use connection::WsConnectionSink;
pub use handler::{websocket_router, ws_handler, WebSocketState};
pub use messages::{ClientMessage, ServerMessage};
