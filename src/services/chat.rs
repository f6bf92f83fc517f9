use serde_json::json;

use crate::auth::AuthUser;
use crate::db::operations::chat::{self, Message};
use crate::db::operations::users;
use crate::db::DatabaseProxy;
use crate::realtime::protocol::{pong, ClientFrame, FrameError};
use crate::realtime::{RealtimeEvent, RealtimeHub};
use crate::response::AppError;
use crate::types::Role;

pub const MESSAGE_MAX_CHARS: usize = 4000;
pub const DEFAULT_PAGE: i64 = 30;
pub const MAX_PAGE: i64 = 100;

/// Direct chats are allowed for every pair except two students.
pub fn can_converse(a: Role, b: Role) -> bool {
    !(a == Role::Student && b == Role::Student)
}

pub fn normalize_body(raw: &str) -> Result<String, String> {
    let body = raw.trim();
    if body.is_empty() {
        return Err("Message must not be empty".to_string());
    }
    if body.chars().count() > MESSAGE_MAX_CHARS {
        return Err(format!("Message must be at most {MESSAGE_MAX_CHARS} characters"));
    }
    Ok(body.to_string())
}

pub async fn open_conversation(
    proxy: &DatabaseProxy,
    user: &AuthUser,
    peer_id: &str,
) -> Result<String, AppError> {
    if peer_id == user.id {
        return Err(AppError::validation("Cannot start a conversation with yourself"));
    }
    let peer = users::find_summary(proxy, peer_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    if !can_converse(user.role, peer.role) {
        return Err(AppError::forbidden("Students cannot message other students"));
    }
    Ok(chat::get_or_create_conversation(proxy, &user.id, peer_id).await?)
}

/// Returns the peer of a conversation the user belongs to.
pub async fn require_member(
    proxy: &DatabaseProxy,
    conversation_id: &str,
    user_id: &str,
) -> Result<String, AppError> {
    chat::peer_of(proxy, conversation_id, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("Conversation not found"))
}

/// Persists a message and pushes `message.new` to the peer's connections.
pub async fn send_message(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    sender_id: &str,
    conversation_id: &str,
    raw_body: &str,
) -> Result<Message, AppError> {
    let body = normalize_body(raw_body).map_err(AppError::validation)?;
    let peer_id = require_member(proxy, conversation_id, sender_id).await?;
    let message = chat::insert_message(proxy, conversation_id, sender_id, &body).await?;

    hub.send_to_user(
        &peer_id,
        RealtimeEvent::new("message.new", json!({ "message": message })),
    );
    Ok(message)
}

pub async fn mark_read(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    user_id: &str,
    conversation_id: &str,
) -> Result<(), AppError> {
    let peer_id = require_member(proxy, conversation_id, user_id).await?;
    let read_at = chat::mark_read(proxy, conversation_id, user_id).await?;
    hub.send_to_user(
        &peer_id,
        RealtimeEvent::new(
            "read",
            json!({ "conversationId": conversation_id, "userId": user_id, "readAt": read_at }),
        ),
    );
    Ok(())
}

/// Handles one client frame. The returned event (if any) goes back to the
/// sending connection; peer fan-out happens through the hub.
pub async fn dispatch_frame(
    proxy: &DatabaseProxy,
    hub: &RealtimeHub,
    user_id: &str,
    frame: ClientFrame,
) -> Option<RealtimeEvent> {
    match frame {
        ClientFrame::Ping => Some(pong()),
        ClientFrame::SendMessage {
            conversation_id,
            body,
            client_id,
        } => match send_message(proxy, hub, user_id, &conversation_id, &body).await {
            Ok(message) => Some(RealtimeEvent::new(
                "message.ack",
                json!({ "clientId": client_id, "message": message }),
            )),
            Err(err) => Some(frame_error(&err).into_event(client_id.as_deref())),
        },
        ClientFrame::Typing { conversation_id } => {
            match require_member(proxy, &conversation_id, user_id).await {
                Ok(peer_id) => {
                    hub.send_to_user(
                        &peer_id,
                        RealtimeEvent::new(
                            "typing",
                            json!({ "conversationId": conversation_id, "userId": user_id }),
                        ),
                    );
                    None
                }
                Err(err) => Some(frame_error(&err).into_event(None)),
            }
        }
        ClientFrame::Read { conversation_id } => {
            match mark_read(proxy, hub, user_id, &conversation_id).await {
                Ok(()) => None,
                Err(err) => Some(frame_error(&err).into_event(None)),
            }
        }
    }
}

fn frame_error(err: &AppError) -> FrameError {
    let code = match err.code() {
        "NOT_FOUND" => "NOT_FOUND",
        "FORBIDDEN" => "FORBIDDEN",
        "VALIDATION_ERROR" => "VALIDATION_ERROR",
        _ => "INTERNAL_ERROR",
    };
    let message = if code == "INTERNAL_ERROR" {
        tracing::warn!(error = %err, "chat frame failed");
        "Unable to process frame".to_string()
    } else {
        err.message().to_string()
    };
    FrameError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn students_cannot_chat_with_students() {
        assert!(!can_converse(Role::Student, Role::Student));
        assert!(can_converse(Role::Student, Role::Tutor));
        assert!(can_converse(Role::Tutor, Role::Student));
        assert!(can_converse(Role::Admin, Role::Student));
        assert!(can_converse(Role::Tutor, Role::Tutor));
    }

    #[test]
    fn message_body_is_trimmed_and_bounded() {
        assert_eq!(normalize_body("  hi  ").unwrap(), "hi");
        assert!(normalize_body("   ").is_err());
        assert!(normalize_body(&"x".repeat(MESSAGE_MAX_CHARS)).is_ok());
        assert!(normalize_body(&"x".repeat(MESSAGE_MAX_CHARS + 1)).is_err());
    }

    #[test]
    fn internal_errors_are_not_leaked_to_sockets() {
        let err = frame_error(&AppError::internal("pool timed out"));
        assert_eq!(err.code, "INTERNAL_ERROR");
        assert!(!err.message.contains("pool"));
        assert_eq!(frame_error(&AppError::not_found("Conversation not found")).code, "NOT_FOUND");
    }
}
