use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::auth::{extract_token, AuthUser};
use crate::db::operations::chat;
use crate::db::DatabaseProxy;
use crate::middleware::auth::authenticate;
use crate::realtime::protocol::{parse_frame, server_ping, FrameError};
use crate::realtime::{RealtimeEvent, RealtimeHub, RoutedEvent};
use crate::response::{created, ok, AppError};
use crate::services::chat::{self as chat_service, DEFAULT_PAGE, MAX_PAGE};
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list_conversations).post(open_conversation))
        .route(
            "/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/conversations/:id/read", post(mark_read))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenConversationRequest {
    peer_id: String,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    before: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    body: String,
}

async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    Ok(ok(chat::list_conversations(&proxy, &user.id).await?))
}

async fn open_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<OpenConversationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    let conversation_id = chat_service::open_conversation(&proxy, &user, payload.peer_id.trim()).await?;
    Ok(ok(serde_json::json!({ "conversationId": conversation_id })))
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    chat_service::require_member(&proxy, &conversation_id, &user.id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let before = query.before.as_deref().filter(|id| !id.is_empty());
    Ok(ok(chat::list_messages(&proxy, &conversation_id, before, limit).await?))
}

async fn send_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Response, AppError> {
    let proxy = state.require_db()?;
    let message = chat_service::send_message(
        &proxy,
        &state.realtime(),
        &user.id,
        &conversation_id,
        &payload.body,
    )
    .await?;
    Ok(created(message))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let proxy = state.require_db()?;
    chat_service::mark_read(&proxy, &state.realtime(), &user.id, &conversation_id).await?;
    Ok(ok(serde_json::json!({ "read": true })))
}

#[derive(Debug, Deserialize)]
pub(super) struct SocketQuery {
    token: Option<String>,
}

/// Chat socket. Authenticates before upgrading; browsers that cannot set
/// headers pass the token as `?token=`.
pub(super) async fn websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SocketQuery>,
) -> Result<Response, AppError> {
    let token = extract_token(&headers)
        .or(query.token.filter(|t| !t.is_empty()))
        .ok_or_else(|| AppError::unauthorized("Missing authentication token"))?;
    let user = authenticate(&state, &token).await?;
    let proxy = state.require_db()?;
    let hub = state.realtime();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, proxy, hub, user)))
}

async fn handle_socket(
    socket: WebSocket,
    proxy: Arc<DatabaseProxy>,
    hub: Arc<RealtimeHub>,
    user: AuthUser,
) {
    let (rx, guard) = hub.connect(&user.id);
    tracing::info!(user_id = %user.id, connection_id = guard.connection_id(), "chat socket opened");

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, &proxy, &hub, &user.id).await;

    tracing::info!(user_id = %user.id, connection_id = guard.connection_id(), "chat socket closed");
    drop(guard);
}

async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<RoutedEvent>,
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    user_id: &str,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if last_seen.elapsed() > IDLE_TIMEOUT {
                    tracing::debug!(user_id, "chat socket idle, closing");
                    break;
                }
                if send_event(&mut sender, &server_ping()).await.is_err() {
                    break;
                }
                if sender.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            routed = rx.recv() => {
                match routed {
                    Ok(routed) if routed.user_id == user_id => {
                        if send_event(&mut sender, &routed.event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id, skipped, "chat socket lagged behind hub");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            incoming = receiver.next() => {
                let reply = match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        last_seen = Instant::now();
                        match parse_frame(&text) {
                            Ok(frame) => chat_service::dispatch_frame(proxy, hub, user_id, frame).await,
                            Err(err) => Some(err.into_event(None)),
                        }
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        last_seen = Instant::now();
                        Some(FrameError::new("INVALID_FRAME", "Binary frames are not supported").into_event(None))
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        last_seen = Instant::now();
                        None
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(user_id, error = %err, "chat socket receive failed");
                        break;
                    }
                };

                if let Some(reply) = reply {
                    if send_event(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    let _ = sender.send(WsMessage::Close(None)).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &RealtimeEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(WsMessage::Text(text)).await,
        Err(err) => {
            tracing::warn!(error = %err, event_type = %event.event_type, "realtime event encode failed");
            Ok(())
        }
    }
}
