use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, base64::Base64};

use crate::config::Timings;
use crate::error::MessageError;
use crate::models::UserId;

/// Offset of a caret in the document text
pub type CursorPosition = u64;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePingMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_position: Option<CursorPosition>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdateMessage {
    pub user_id: UserId,
    pub position: CursorPosition,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentDiffMessage {
    #[serde_as(as = "Base64")]
    pub diff: Vec<u8>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdateMessage {
    #[serde_as(as = "Base64")]
    pub update: Vec<u8>,
}

/// Timing parameters the client uses to throttle itself, in milliseconds
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMessage {
    pub ping_interval: u64,
    pub stale_threshold: u64,
    pub cursor_throttle: u64,
    pub content_debounce: u64,
    pub render_interval: u64,
    pub sse_keepalive: u64,
    pub sse_reconnect: u64,
}

impl From<&Timings> for ConfigMessage {
    fn from(t: &Timings) -> Self {
        let ms = |d: std::time::Duration| d.as_millis() as u64;
        Self {
            ping_interval: ms(t.ping_interval),
            stale_threshold: ms(t.stale_threshold),
            cursor_throttle: ms(t.cursor_throttle),
            content_debounce: ms(t.content_debounce),
            render_interval: ms(t.render_interval),
            sse_keepalive: ms(t.sse_keepalive),
            sse_reconnect: ms(t.sse_reconnect),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub cursor_position: Option<CursorPosition>,
    /// RFC 3339 time of the last heartbeat
    pub last_seen: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceListMessage {
    pub users: Vec<PresenceUser>,
}

/// Messages a client may send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    PresencePing(PresencePingMessage),
    CursorUpdate(CursorUpdateMessage),
    ContentDiff(ContentDiffMessage),
}

/// Messages the server sends
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendMessage {
    Config(ConfigMessage),
    PresenceList(PresenceListMessage),
    CursorUpdate(CursorUpdateMessage),
    ContentUpdate(ContentUpdateMessage),
}

/// A decoded inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub session_id: Option<String>,
    pub message: ClientMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    payload: Value,
}

fn payload<T: serde::de::DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, MessageError> {
    // An absent payload is an empty object
    let value = if value.is_null() { Value::Object(Default::default()) } else { value };
    serde_json::from_value(value).map_err(|source| MessageError::BadPayload { kind, source })
}

impl ReceivedMessage {
    /// Decode one text frame of the control channel
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(MessageError::Malformed)?;

        let message = match raw.kind.as_str() {
            "PRESENCE_PING" => ClientMessage::PresencePing(payload("PRESENCE_PING", raw.payload)?),
            "CURSOR_UPDATE" => ClientMessage::CursorUpdate(payload("CURSOR_UPDATE", raw.payload)?),
            "CONTENT_DIFF" => ClientMessage::ContentDiff(payload("CONTENT_DIFF", raw.payload)?),
            "CONFIG" => return Err(MessageError::WrongDirection("CONFIG")),
            "PRESENCE_LIST" => return Err(MessageError::WrongDirection("PRESENCE_LIST")),
            "CONTENT_UPDATE" => return Err(MessageError::WrongDirection("CONTENT_UPDATE")),
            _ => return Err(MessageError::UnknownType(raw.kind)),
        };

        Ok(Self {
            session_id: raw.session_id,
            message,
        })
    }
}

impl ClientMessage {
    /// Encode as a client would send it
    pub fn encode(&self, session_id: &str) -> String {
        let (kind, payload) = match self {
            ClientMessage::PresencePing(m) => ("PRESENCE_PING", serde_json::to_value(m)),
            ClientMessage::CursorUpdate(m) => ("CURSOR_UPDATE", serde_json::to_value(m)),
            ClientMessage::ContentDiff(m) => ("CONTENT_DIFF", serde_json::to_value(m)),
        };
        serde_json::json!({
            "type": kind,
            "sessionId": session_id,
            "payload": payload.unwrap_or(Value::Null),
        })
        .to_string()
    }
}

impl SendMessage {
    /// Encode into the `{type, sessionId, payload}` envelope
    pub fn encode(&self, session_id: &str) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("sessionId".to_string(), Value::String(session_id.to_string()));
        }
        serde_json::to_string(&value)
    }

    pub fn decode(text: &str) -> Result<(String, Self), serde_json::Error> {
        let mut value: Value = serde_json::from_str(text)?;
        let session_id = value
            .as_object_mut()
            .and_then(|map| map.remove("sessionId"))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Ok((session_id, serde_json::from_value(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_presence_ping_without_payload() {
        let msg = ReceivedMessage::decode(r#"{"type":"PRESENCE_PING","sessionId":"intro.md"}"#).unwrap();
        assert_eq!(msg.session_id.as_deref(), Some("intro.md"));
        assert_eq!(msg.message, ClientMessage::PresencePing(PresencePingMessage::default()));
    }

    #[test]
    fn decodes_cursor_update() {
        let msg = ReceivedMessage::decode(
            r#"{"type":"CURSOR_UPDATE","sessionId":"intro.md","payload":{"userId":"alice","position":42}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.message,
            ClientMessage::CursorUpdate(CursorUpdateMessage {
                user_id: "alice".into(),
                position: 42
            })
        );
    }

    #[test]
    fn decodes_base64_content_diff() {
        let msg = ReceivedMessage::decode(r#"{"type":"CONTENT_DIFF","payload":{"diff":"AQID"}}"#).unwrap();
        assert_eq!(
            msg.message,
            ClientMessage::ContentDiff(ContentDiffMessage { diff: vec![1, 2, 3] })
        );
    }

    #[test]
    fn classifies_undeliverable_frames() {
        assert!(matches!(ReceivedMessage::decode("not json"), Err(MessageError::Malformed(_))));
        assert!(matches!(
            ReceivedMessage::decode(r#"{"type":"SHRUG","payload":{}}"#),
            Err(MessageError::UnknownType(kind)) if kind == "SHRUG"
        ));
        assert!(matches!(
            ReceivedMessage::decode(r#"{"type":"CURSOR_UPDATE","payload":{"position":"x"}}"#),
            Err(MessageError::BadPayload { kind: "CURSOR_UPDATE", .. })
        ));
        assert!(matches!(
            ReceivedMessage::decode(r#"{"type":"CONFIG","payload":{}}"#),
            Err(MessageError::WrongDirection("CONFIG"))
        ));
    }

    #[test]
    fn server_messages_use_the_envelope() {
        let text = SendMessage::ContentUpdate(ContentUpdateMessage { update: vec![1, 2, 3] })
            .encode("intro.md")
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "CONTENT_UPDATE");
        assert_eq!(value["sessionId"], "intro.md");
        assert_eq!(value["payload"]["update"], "AQID");

        let (session_id, decoded) = SendMessage::decode(&text).unwrap();
        assert_eq!(session_id, "intro.md");
        assert_eq!(decoded, SendMessage::ContentUpdate(ContentUpdateMessage { update: vec![1, 2, 3] }));
    }

    #[test]
    fn client_encoding_is_accepted_by_the_decoder() {
        let msg = ClientMessage::CursorUpdate(CursorUpdateMessage {
            user_id: "bob".into(),
            position: 7,
        });
        let decoded = ReceivedMessage::decode(&msg.encode("intro.md")).unwrap();
        assert_eq!(decoded.message, msg);
    }
}
