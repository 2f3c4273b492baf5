use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MEMBER: &str = "member";

pub const CHAT_PERSONAL: &str = "personal";
pub const CHAT_CHANNEL: &str = "channel";

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub profile_picture: Option<String>,
}

/// User shape returned to other users (no credentials).
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub status: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub profile_picture: Option<String>,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            phone: user.phone,
            email: user.email,
            status: user.status,
            last_seen: user.last_seen,
            profile_picture: user.profile_picture,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub blocked: bool,
}

/// Chat plus its membership, as returned by the detail endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetail {
    #[serde(flatten)]
    pub chat: Chat,
    pub members: Vec<ChatMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: Uuid,
    pub user_id: Uuid,
    pub media_url: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Message kinds accepted on the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Location,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Location => "location",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_wire_field_names() {
        let msg = Message {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            kind: "text".into(),
            content: "hi".into(),
            media_url: None,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("chatId").is_some());
        assert!(value.get("senderId").is_some());
        assert_eq!(value.get("type").unwrap(), "text");
        assert!(value.get("mediaUrl").is_some());
    }

    #[test]
    fn password_hash_never_serializes() {
        let user = User {
            id: Uuid::new_v4(),
            name: "Alice".into(),
            phone: "+15550001".into(),
            email: None,
            password_hash: "secret".into(),
            status: STATUS_OFFLINE.into(),
            last_seen: None,
            profile_picture: None,
        };

        let raw = serde_json::to_string(&user).unwrap();
        assert!(!raw.contains("secret"));
        assert!(!raw.contains("passwordHash"));
    }

    #[test]
    fn message_kind_round_trips_lowercase() {
        let kind: MessageKind = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(kind, MessageKind::Image);
        assert_eq!(kind.as_str(), "image");
    }
}
