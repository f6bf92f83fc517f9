use serde::Deserialize;
use serde_json::json;

use super::hub::RealtimeEvent;

pub const MAX_FRAME_BYTES: usize = 16 * 1024;

const KNOWN_TYPES: &[&str] = &["ping", "message.send", "typing", "read"];

/// Client-to-server frames of the chat socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "message.send", rename_all = "camelCase")]
    SendMessage {
        conversation_id: String,
        body: String,
        #[serde(default)]
        client_id: Option<String>,
    },
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { conversation_id: String },
    #[serde(rename = "read", rename_all = "camelCase")]
    Read { conversation_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError {
    pub code: &'static str,
    pub message: String,
}

impl FrameError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn into_event(self, client_id: Option<&str>) -> RealtimeEvent {
        RealtimeEvent::new(
            "error",
            json!({ "code": self.code, "message": self.message, "clientId": client_id }),
        )
    }
}

pub fn parse_frame(raw: &str) -> Result<ClientFrame, FrameError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(FrameError::new("FRAME_TOO_LARGE", "Frame exceeds size limit"));
    }

    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| FrameError::new("INVALID_JSON", "Frame is not valid JSON"))?;

    let frame_type = value
        .get("type")
        .and_then(|value| value.as_str())
        .ok_or_else(|| FrameError::new("INVALID_FRAME", "Frame has no type"))?;

    if !KNOWN_TYPES.contains(&frame_type) {
        return Err(FrameError::new(
            "UNKNOWN_TYPE",
            format!("Unsupported frame type '{frame_type}'"),
        ));
    }

    serde_json::from_value(value)
        .map_err(|err| FrameError::new("INVALID_FRAME", format!("Malformed frame: {err}")))
}

pub fn pong() -> RealtimeEvent {
    RealtimeEvent::new("pong", json!({ "timestamp": chrono::Utc::now().to_rfc3339() }))
}

pub fn server_ping() -> RealtimeEvent {
    RealtimeEvent::new("ping", json!({ "timestamp": chrono::Utc::now().to_rfc3339() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_frames() {
        assert_eq!(parse_frame(r#"{"type":"ping"}"#), Ok(ClientFrame::Ping));
        assert_eq!(
            parse_frame(r#"{"type":"message.send","conversationId":"c1","body":"hi","clientId":"tmp-1"}"#),
            Ok(ClientFrame::SendMessage {
                conversation_id: "c1".into(),
                body: "hi".into(),
                client_id: Some("tmp-1".into()),
            })
        );
        assert_eq!(
            parse_frame(r#"{"type":"typing","conversationId":"c9"}"#),
            Ok(ClientFrame::Typing {
                conversation_id: "c9".into()
            })
        );
    }

    #[test]
    fn classifies_bad_frames() {
        assert_eq!(parse_frame("not json").unwrap_err().code, "INVALID_JSON");
        assert_eq!(parse_frame(r#"{"body":"x"}"#).unwrap_err().code, "INVALID_FRAME");
        assert_eq!(parse_frame(r#"{"type":"teleport"}"#).unwrap_err().code, "UNKNOWN_TYPE");
        assert_eq!(
            parse_frame(r#"{"type":"message.send","body":"missing conversation"}"#)
                .unwrap_err()
                .code,
            "INVALID_FRAME"
        );
        let huge = format!(r#"{{"type":"ping","pad":"{}"}}"#, "x".repeat(MAX_FRAME_BYTES));
        assert_eq!(parse_frame(&huge).unwrap_err().code, "FRAME_TOO_LARGE");
    }

    #[test]
    fn error_event_carries_code_and_client_id() {
        let event = FrameError::new("FORBIDDEN", "nope").into_event(Some("tmp-2"));
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "FORBIDDEN");
        assert_eq!(value["clientId"], "tmp-2");
    }
}
