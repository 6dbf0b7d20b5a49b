//! ConnectionSink adapter over one socket's outbound queue.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::messages::ServerMessage;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{ConnectionSink, PushFrame};

/// Sink writing frames into a bounded per-connection queue.
///
/// The connection task drains the queue onto the socket. A full queue
/// makes `push` wait, which is what lets the registry's send timeout
/// detect a stalled client; a dropped receiver (connection task gone)
/// surfaces as `ConnectionClosed`.
pub struct WsConnectionSink {
    tx: mpsc::Sender<ServerMessage>,
}

impl WsConnectionSink {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ConnectionSink for WsConnectionSink {
    async fn push(&self, frame: PushFrame) -> Result<(), DomainError> {
        self.tx.send(frame.into()).await.map_err(|_| {
            DomainError::new(ErrorCode::ConnectionClosed, "connection queue closed")
        })
    }
}
