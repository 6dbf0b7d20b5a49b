//! WebSocket upgrade handler for realtime delivery connections.
//!
//! Owns the connection lifecycle:
//! 1. Upgrade and register the connection (presence goes online)
//! 2. Run catch-up replay for the reconnecting user
//! 3. Pump frames both ways until disconnect
//! 4. Deregister (presence grace timer starts)
//!
//! The sink is registered *before* the catch-up query, so events
//! published while replay is being assembled land in the outbound queue
//! and are buffered by the sync session instead of being lost; the flush
//! after the client's acknowledgement deduplicates against the replay.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use super::connection::WsConnectionSink;
use super::messages::{
    CatchUpMessage, ClientMessage, ConnectedMessage, ErrorMessage, ServerMessage,
};
use crate::application::{
    presence::ConnectionHandle, CatchUpCoordinator, CatchUpPlan, EventBus, PresenceRegistry,
    TypingStore,
};
use crate::domain::foundation::{DeviceTag, EventDraft, Sequence, Timestamp, UserId};
use crate::domain::sync::{SyncPhase, SyncSession};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub presence: PresenceRegistry,
    pub bus: Arc<EventBus>,
    pub catchup: Arc<CatchUpCoordinator>,
    pub typing: Arc<TypingStore>,
    pub send_queue_capacity: usize,
}

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Device label for logging and multi-device debugging.
    pub device: Option<String>,
    /// Last sequence the client has acknowledged locally.
    pub cursor: Option<u64>,
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /users/:user_id/live?device=...&cursor=...`
///
/// Authentication happens at the gateway in front of this service; by the
/// time a request reaches here the user id in the path is trusted.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<i64>,
    Query(params): Query<ConnectParams>,
    State(state): State<WebSocketState>,
) -> Response {
    let user_id = UserId::new(user_id);
    if !user_id.is_routable() {
        return Response::builder()
            .status(400)
            .body("Invalid user id".into())
            .expect("static response construction");
    }

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, params, state))
}

async fn handle_socket(
    socket: WebSocket,
    user_id: UserId,
    params: ConnectParams,
    state: WebSocketState,
) {
    let (mut sender, mut receiver) = socket.split();

    let mut session = SyncSession::new();
    if let Err(e) = session.begin_connect() {
        tracing::error!(user_id = %user_id, error = %e, "sync session refused connect");
        return;
    }

    let mut presence_rx = state.presence.subscribe();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.send_queue_capacity);
    let handle = ConnectionHandle::new(
        user_id,
        DeviceTag::new(params.device.unwrap_or_default()),
        Arc::new(WsConnectionSink::new(tx)),
    );
    let connection_id = handle.id;

    // Register first: events published from here on reach our queue and
    // are buffered until catch-up completes.
    state.presence.connect(handle).await;

    let connected = ServerMessage::Connected(ConnectedMessage {
        user_id,
        connection_id: connection_id.to_string(),
        timestamp: Timestamp::now().as_datetime().to_rfc3339(),
    });
    if send_message(&mut sender, &connected).await.is_err() {
        state.presence.disconnect(user_id, connection_id).await;
        return;
    }

    let client_cursor = Sequence::new(params.cursor.unwrap_or(0));
    // Infallible once Connecting; begin_connect succeeded above.
    let _ = session.begin_catch_up();

    let mut replay_high = None;
    match state.catchup.on_reconnect(user_id, client_cursor).await {
        Ok(CatchUpPlan::Replay { events, high }) => {
            replay_high = Some(high);
            let batch = ServerMessage::CatchUp(CatchUpMessage { events, high });
            if send_message(&mut sender, &batch).await.is_err() {
                state.presence.disconnect(user_id, connection_id).await;
                return;
            }
        }
        Ok(CatchUpPlan::FullResync) => {
            if send_message(&mut sender, &ServerMessage::Resync).await.is_err() {
                state.presence.disconnect(user_id, connection_id).await;
                return;
            }
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "catch-up planning failed");
            let error = ServerMessage::Error(ErrorMessage::new(
                e.code.to_string(),
                "catch-up failed, please reconnect",
            ));
            let _ = send_message(&mut sender, &error).await;
            state.presence.disconnect(user_id, connection_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(message) = frame else {
                    // Registry dropped us (send timeout or disconnect).
                    break;
                };
                if session.phase() == SyncPhase::CatchingUp {
                    if let ServerMessage::Event(event) = &message {
                        let _ = session.buffer_live(event.clone());
                        continue;
                    }
                }
                if send_message(&mut sender, &message).await.is_err() {
                    break;
                }
            }

            change = presence_rx.recv() => {
                match change {
                    Ok(change) => {
                        // Our own transitions are implied by the socket.
                        if change.user_id != user_id
                            && send_message(&mut sender, &ServerMessage::Presence(change))
                                .await
                                .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(user_id = %user_id, skipped, "presence stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            incoming = receiver.next() => {
                let Some(result) = incoming else { break };
                match result {
                    Ok(Message::Text(text)) => {
                        let parsed = serde_json::from_str::<ClientMessage>(&text);
                        let Ok(client_msg) = parsed else {
                            tracing::debug!(user_id = %user_id, "unparseable client message");
                            continue;
                        };
                        if handle_client_message(
                            client_msg,
                            user_id,
                            &state,
                            &mut session,
                            &mut replay_high,
                            &mut sender,
                        )
                        .await
                        .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        tracing::warn!(user_id = %user_id, "unsupported binary message");
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        tracing::debug!(user_id = %user_id, "receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.presence.disconnect(user_id, connection_id).await;
    session.disconnect();
    tracing::debug!(user_id = %user_id, connection_id = %connection_id, "connection closed");
}

/// Applies one client message. An `Err` means the socket is dead.
async fn handle_client_message(
    message: ClientMessage,
    user_id: UserId,
    state: &WebSocketState,
    session: &mut SyncSession,
    replay_high: &mut Option<Sequence>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    match message {
        ClientMessage::Ack { seq } => {
            let covers_replay = matches!(*replay_high, Some(high) if seq >= high);
            if covers_replay {
                *replay_high = None;
            }
            if session.phase() == SyncPhase::CatchingUp && covers_replay {
                if let Ok(pending) = session.complete_catch_up(seq) {
                    for event in pending {
                        send_message(sender, &ServerMessage::Event(event)).await?;
                    }
                }
            }
            if let Err(e) = state.catchup.ack(user_id, seq).await {
                tracing::warn!(user_id = %user_id, seq = %seq, error = %e, "ack failed");
            }
        }

        ClientMessage::Resynced { seq } => {
            state.catchup.mark_resynced(user_id, seq).await;
            if session.phase() == SyncPhase::CatchingUp {
                if let Ok(pending) = session.complete_catch_up(seq) {
                    for event in pending {
                        send_message(sender, &ServerMessage::Event(event)).await?;
                    }
                }
            }
        }

        ClientMessage::MarkRead { chat_id, up_to_seq } => {
            let draft = EventDraft::message_read(chat_id, user_id, up_to_seq);
            if let Err(e) = state.bus.publish(draft).await {
                tracing::error!(user_id = %user_id, chat_id = %chat_id, error = %e, "mark-read publish failed");
                let error = ServerMessage::Error(ErrorMessage::new(
                    e.code.to_string(),
                    "read receipt not recorded, please retry",
                ));
                send_message(sender, &error).await?;
            }
        }

        ClientMessage::Typing { chat_id, participants } => {
            state.typing.set_typing(chat_id, user_id, &participants).await;
        }

        ClientMessage::TypingStopped { chat_id } => {
            state.typing.clear_typing(chat_id, user_id).await;
        }

        ClientMessage::Ping => {
            send_message(sender, &ServerMessage::Pong).await?;
        }
    }
    Ok(())
}

/// Send a JSON message over the WebSocket.
async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).expect("server message serialization is infallible");
    sender.send(Message::Text(json)).await
}

/// Create the axum router for the realtime endpoint.
pub fn websocket_router() -> axum::Router<WebSocketState> {
    use axum::routing::get;

    axum::Router::new().route("/users/:user_id/live", get(ws_handler))
}
