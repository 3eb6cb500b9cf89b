use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::{AppError, AppResult, GetField, store::{Message, MessageKind}};

/// What an inbound frame turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// Peer-to-peer negotiation data. Relayed untouched, never stored.
    Signal,
    Chat(ChatSubmission),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ChatSubmission {
    pub(crate) sender: String,
    pub(crate) content: String,
    pub(crate) kind: MessageKind,
}

pub(crate) fn classify(raw: &str) -> AppResult<Inbound> {
    let value: Value = serde_json::from_str(raw)?;

    if value.get("webrtc").is_some_and(truthy) {
        return Ok(Inbound::Signal);
    }

    let kind = match value.get("type") {
        None | Some(Value::Null) => MessageKind::default(),
        Some(Value::String(kind)) => kind.parse().map_err(AppError::Protocol)?,
        Some(other) => return Err(AppError::Protocol(format!("expected type to be a string, got {other}"))),
    };

    Ok(Inbound::Chat(ChatSubmission {
        sender: value.get_str_field("sender")?,
        content: value.get_str_field("content")?,
        kind,
    }))
}

/// Whether a flag counts as set: `true`, a non-zero number, or a non-empty string, array or object.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// The normalized shape every client receives for a chat message, live or replayed.
#[derive(Debug, Serialize)]
pub(crate) struct ChatFrame<'a> {
    sender: &'a str,
    content: &'a str,
    #[serde(rename = "type")]
    kind: MessageKind,
    timestamp: String,
}

impl ChatFrame<'_> {
    pub(crate) fn encode(message: &Message) -> AppResult<Utf8Bytes> {
        Ok(serde_json::to_string(&ChatFrame::from(message))?.into())
    }
}

impl<'a> From<&'a Message> for ChatFrame<'a> {
    fn from(message: &'a Message) -> Self {
        ChatFrame {
            sender: &message.sender,
            content: &message.content,
            kind: message.kind,
            timestamp: message.wire_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    error: &'a str,
}

impl<'a> ErrorFrame<'a> {
    pub(crate) fn new(error: &'a str) -> Self {
        ErrorFrame { kind: "error", error }
    }

    pub(crate) fn encode(&self) -> AppResult<Utf8Bytes> {
        Ok(serde_json::to_string(self)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webrtc_flag_marks_a_signal() {
        let frame = r#"{"webrtc":true,"sdp":{"type":"offer"},"from":"x"}"#;
        assert_eq!(classify(frame).unwrap(), Inbound::Signal);
    }

    #[test]
    fn any_truthy_webrtc_flag_marks_a_signal() {
        for flag in ["1", "-2.5", r#""yes""#, "[0]", r#"{"v":1}"#] {
            let frame = format!(r#"{{"webrtc":{flag},"candidate":{{}}}}"#);
            assert_eq!(classify(&frame).unwrap(), Inbound::Signal, "{flag}");
        }
    }

    #[test]
    fn falsy_webrtc_flags_fall_through_to_chat() {
        for flag in ["0", "0.0", r#""""#, "[]", "{}", "null"] {
            let frame = format!(r#"{{"webrtc":{flag},"sender":"a","content":"b"}}"#);
            assert!(matches!(classify(&frame).unwrap(), Inbound::Chat(_)), "{flag}");
        }
    }

    #[test]
    fn false_webrtc_flag_is_a_chat_message() {
        let frame = r#"{"webrtc":false,"sender":"a","content":"b"}"#;
        assert!(matches!(classify(frame).unwrap(), Inbound::Chat(_)));
    }

    #[test]
    fn missing_type_defaults_to_text() {
        let Inbound::Chat(chat) = classify(r#"{"sender":"alice","content":"hi"}"#).unwrap() else {
            panic!("expected a chat message");
        };
        assert_eq!(
            chat,
            ChatSubmission {
                sender: "alice".to_owned(),
                content: "hi".to_owned(),
                kind: MessageKind::Text,
            }
        );
    }

    #[test]
    fn media_kinds_are_kept() {
        let Inbound::Chat(chat) =
            classify(r#"{"sender":"bob","content":"/uploads/1_a.mov","type":"video"}"#).unwrap()
        else {
            panic!("expected a chat message");
        };
        assert_eq!(chat.kind, MessageKind::Video);
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        for raw in [
            "not json",
            "[1,2,3]",
            r#"{"content":"no sender"}"#,
            r#"{"sender":"a"}"#,
            r#"{"sender":1,"content":"x"}"#,
            r#"{"sender":"a","content":"b","type":"audio"}"#,
        ] {
            assert!(
                matches!(classify(raw), Err(AppError::Protocol(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn error_frame_shape() {
        let json = serde_json::to_value(ErrorFrame::new("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "error": "nope"}));
    }
}
