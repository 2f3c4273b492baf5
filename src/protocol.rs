use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Message, Story};

pub const PROTOCOL_VERSION: u8 = 1;

/// Event types crossing the wire, the bus and the pub/sub layer. The wire
/// carries the SCREAMING_SNAKE names; the bus routes on the dotted keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    MessageSent,
    MessageRead,
    TypingIndicator,
    UserConnected,
    UserDisconnected,
    StoryCreated,
}

impl EventType {
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::MessageSent => "message.sent",
            Self::MessageRead => "message.read",
            Self::TypingIndicator => "typing.indicator",
            Self::UserConnected => "user.connected",
            Self::UserDisconnected => "user.disconnected",
            Self::StoryCreated => "story.created",
        }
    }

    pub fn from_routing_key(key: &str) -> Option<Self> {
        match key {
            "message.sent" => Some(Self::MessageSent),
            "message.read" => Some(Self::MessageRead),
            "typing.indicator" => Some(Self::TypingIndicator),
            "user.connected" => Some(Self::UserConnected),
            "user.disconnected" => Some(Self::UserDisconnected),
            "story.created" => Some(Self::StoryCreated),
            _ => None,
        }
    }
}

/// JSON envelope shared by the wire protocol, the bus and the pub/sub
/// frames: `{ "type": ..., "payload": ..., "timestamp": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    fn new(kind: EventType, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn message_sent(message: &Message) -> Self {
        let payload = serde_json::to_value(message).unwrap_or(Value::Null);
        Self::new(EventType::MessageSent, payload)
    }

    pub fn message_read(chat_id: Uuid, message_id: Uuid, user_id: Uuid) -> Self {
        Self::new(
            EventType::MessageRead,
            serde_json::json!({
                "chatId": chat_id,
                "messageId": message_id,
                "userId": user_id,
            }),
        )
    }

    pub fn typing_indicator(chat_id: Uuid, user_id: Uuid, is_typing: bool) -> Self {
        Self::new(
            EventType::TypingIndicator,
            serde_json::json!({
                "chatId": chat_id,
                "userId": user_id,
                "isTyping": is_typing,
            }),
        )
    }

    pub fn user_connected(user_id: Uuid) -> Self {
        Self::new(
            EventType::UserConnected,
            serde_json::json!({ "userId": user_id }),
        )
    }

    pub fn user_disconnected(user_id: Uuid) -> Self {
        Self::new(
            EventType::UserDisconnected,
            serde_json::json!({ "userId": user_id }),
        )
    }

    pub fn story_created(story: &Story) -> Self {
        let payload = serde_json::to_value(story).unwrap_or(Value::Null);
        Self::new(EventType::StoryCreated, payload)
    }
}

/// Pub/sub frame: the event envelope plus the originating node, so a hub
/// can drop frames it published itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubFrame {
    pub instance_id: String,
    #[serde(flatten)]
    pub event: Event,
}

/// Per-user fan-out channel name.
pub fn user_channel(user_id: Uuid) -> String {
    format!("ws:user:{user_id}")
}

/// Frames accepted from clients. Anything but a typing indicator is
/// ignored by the read loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Typing { chat_id: Uuid, is_typing: bool },
    Ignored,
}

#[derive(Debug, Deserialize)]
struct RawClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    chat_id: Uuid,
    is_typing: bool,
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let frame: RawClientFrame = serde_json::from_str(raw)?;
        if frame.kind != "TYPING_INDICATOR" {
            return Ok(Self::Ignored);
        }
        let typing: TypingPayload = serde_json::from_value(frame.payload)?;
        Ok(Self::Typing {
            chat_id: typing.chat_id,
            is_typing: typing.is_typing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn routing_keys_round_trip() {
        for kind in [
            EventType::MessageSent,
            EventType::MessageRead,
            EventType::TypingIndicator,
            EventType::UserConnected,
            EventType::UserDisconnected,
            EventType::StoryCreated,
        ] {
            assert_eq!(EventType::from_routing_key(kind.routing_key()), Some(kind));
        }
        assert_eq!(EventType::from_routing_key("message.deleted"), None);
    }

    #[test]
    fn envelope_uses_wire_type_names() {
        let event = Event::typing_indicator(Uuid::new_v4(), Uuid::new_v4(), true);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "TYPING_INDICATOR");
        assert_eq!(value["payload"]["isTyping"], true);
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn pubsub_frame_flattens_envelope() {
        let frame = PubSubFrame {
            instance_id: "node-1".into(),
            event: Event::user_connected(Uuid::new_v4()),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["instanceId"], "node-1");
        assert_eq!(value["type"], "USER_CONNECTED");

        let back: PubSubFrame = serde_json::from_value(value).unwrap();
        assert_eq!(back.instance_id, "node-1");
        assert_eq!(back.event.kind, EventType::UserConnected);
    }

    #[test]
    fn client_frame_accepts_only_typing() {
        let chat_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"TYPING_INDICATOR","payload":{{"chatId":"{chat_id}","isTyping":true}},"timestamp":"{}"}}"#,
            Utc::now().to_rfc3339()
        );
        assert_eq!(
            ClientFrame::parse(&raw).unwrap(),
            ClientFrame::Typing {
                chat_id,
                is_typing: true
            }
        );

        let unknown = r#"{"type":"MESSAGE_SENT","payload":{}}"#;
        assert_eq!(ClientFrame::parse(unknown).unwrap(), ClientFrame::Ignored);

        assert!(ClientFrame::parse("not json").is_err());
    }

    #[test]
    fn user_channel_is_prefixed() {
        let id = Uuid::new_v4();
        assert_eq!(user_channel(id), format!("ws:user:{id}"));
    }
}
