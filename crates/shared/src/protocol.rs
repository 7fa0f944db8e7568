use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{GroupId, NotificationId, PresenceStatus, UserId},
    error::ProtocolError,
};

/// Inbound event kinds. Anything else on the wire is dropped so the server
/// can introduce new kinds without breaking older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DirectMessage,
    GroupMessage,
    Notification,
    PresenceUpdate,
}

impl EventKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "receive_message" => Some(EventKind::DirectMessage),
            "receive_group_message" => Some(EventKind::GroupMessage),
            "notification" => Some(EventKind::Notification),
            "user_status_update" => Some(EventKind::PresenceUpdate),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            EventKind::DirectMessage => "receive_message",
            EventKind::GroupMessage => "receive_group_message",
            EventKind::Notification => "notification",
            EventKind::PresenceUpdate => "user_status_update",
        }
    }
}

// The payload stays raw until the kind is recognized, so unknown kinds
// never fail the parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::MalformedFrame)
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| {
            ProtocolError::InvalidPayload {
                kind: self.kind.clone(),
                source,
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        message: String,
        receiver_id: UserId,
        session_token: String,
    },
    SendTyping {
        receiver_id: UserId,
        is_typing: bool,
        session_token: String,
    },
    SendGroupMessage {
        message: String,
        group_id: GroupId,
        session_token: String,
    },
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessageEvent {
    pub message: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub sent_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageEvent {
    pub message: String,
    pub sender_id: UserId,
    pub group_id: GroupId,
    pub sent_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub id: UserId,
    pub full_name: String,
    pub status: PresenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<String>,
}

// Online users arrive as full entries, offline users as bare ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceDelta {
    #[serde(default)]
    pub online_users: Vec<PresenceEntry>,
    #[serde(default)]
    pub offline_user_ids: Vec<UserId>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
