use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::auth;
use crate::error::{ApiError, ApiResult};
use crate::protocol::{ClientFrame, Event};
use crate::state::AppState;

const MAX_MISSED_PONGS: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// Handshake: `/ws?token=<bearer>`. Missing or invalid tokens are rejected
/// before the upgrade.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> ApiResult<Response> {
    let token = params.token.ok_or(ApiError::Unauthenticated)?;
    let user_id = auth::validate_token(&token, &state.config.auth)?;

    Ok(ws.on_upgrade(move |socket| handle_session(socket, state, user_id)))
}

async fn handle_session(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (ws_tx, ws_rx) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    let session_id = state.hub.register(user_id, tx).await;
    tracing::info!(
        component = "ws",
        user_id = %user_id,
        session_id = %session_id,
        "session open"
    );

    let missed_pongs = Arc::new(AtomicU32::new(0));

    let mut write_task = tokio::spawn(write_loop(
        ws_tx,
        rx,
        state.config.hub.ping_interval,
        state.config.hub.write_timeout,
        missed_pongs.clone(),
    ));
    let mut read_task = tokio::spawn(read_loop(ws_rx, state.clone(), user_id, missed_pongs));

    // Either half failing tears the whole session down; a session dying
    // mid-write drops its queued events, the client resyncs over REST.
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.hub.unregister(user_id, session_id).await;
    tracing::info!(
        component = "ws",
        user_id = %user_id,
        session_id = %session_id,
        "session closed"
    );
}

/// Drains the session's FIFO queue onto the socket and keeps the heartbeat.
/// A write exceeding the timeout closes the session.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    ping_interval: Duration,
    write_timeout: Duration,
    missed_pongs: Arc<AtomicU32>,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(component = "ws", error = %e, "unencodable event skipped");
                        continue;
                    }
                };
                match timeout(write_timeout, ws_tx.send(Message::Text(json))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
            _ = ping.tick() => {
                let outstanding = missed_pongs.fetch_add(1, Ordering::SeqCst);
                if outstanding >= MAX_MISSED_PONGS {
                    tracing::debug!(component = "ws", "heartbeat lost, closing session");
                    break;
                }
                match timeout(write_timeout, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }

    let _ = ws_tx.close().await;
}

/// Only typing indicators are accepted from clients; the sender identity
/// comes from the session, never the frame.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    state: AppState,
    user_id: Uuid,
    missed_pongs: Arc<AtomicU32>,
) {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match ClientFrame::parse(&text) {
                Ok(ClientFrame::Typing { chat_id, is_typing }) => {
                    state.dispatcher.typing(chat_id, user_id, is_typing).await;
                }
                Ok(ClientFrame::Ignored) => {
                    tracing::debug!(component = "ws", user_id = %user_id, "unknown frame type ignored");
                }
                Err(e) => {
                    tracing::debug!(component = "ws", user_id = %user_id, error = %e, "undecodable frame ignored");
                }
            },
            Ok(Message::Pong(_)) => {
                missed_pongs.store(0, Ordering::SeqCst);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(component = "ws", user_id = %user_id, error = %e, "socket read failed");
                break;
            }
        }
    }
}
