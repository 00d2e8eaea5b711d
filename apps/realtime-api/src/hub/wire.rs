//! Wire envelope and per-kind payloads.
//!
//! Every frame is `{ "type": <kind>, "data": <payload>, "timestamp": … }`.
//! The kind set is closed: unrecognized kinds decode to an explicit
//! `Unknown` variant and are ignored by the dispatcher, never crashed on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::store::{Conversation, MessageRecord};

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Chat,
    Typing,
    Media,
    UserStatusUpdate,
    OnlineUsers,
    ChatList,
    ChatMessages,
    MessagesRead,
    GroupInvitation,
    Notification,
    JoinGroup,
    LeaveGroup,
    GroupEventCreated,
    /// Any kind this process does not recognize. Kept permissive for
    /// forward compatibility; the dispatcher logs and drops these.
    Unknown,
}

impl MessageKind {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "chat" => Self::Chat,
            "typing" => Self::Typing,
            "media" => Self::Media,
            "user_status_update" => Self::UserStatusUpdate,
            "online_users" => Self::OnlineUsers,
            "chat_list" => Self::ChatList,
            "chat_messages" => Self::ChatMessages,
            "messages_read" => Self::MessagesRead,
            "group_invitation" => Self::GroupInvitation,
            "notification" => Self::Notification,
            "join_group" => Self::JoinGroup,
            "leave_group" => Self::LeaveGroup,
            "group_event_created" => Self::GroupEventCreated,
            _ => Self::Unknown,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Typing => "typing",
            Self::Media => "media",
            Self::UserStatusUpdate => "user_status_update",
            Self::OnlineUsers => "online_users",
            Self::ChatList => "chat_list",
            Self::ChatMessages => "chat_messages",
            Self::MessagesRead => "messages_read",
            Self::GroupInvitation => "group_invitation",
            Self::Notification => "notification",
            Self::JoinGroup => "join_group",
            Self::LeaveGroup => "leave_group",
            Self::GroupEventCreated => "group_event_created",
            Self::Unknown => "unknown",
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// A frame received from a client.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub data: Value,
}

/// A frame sent to clients. Encoded once and shared across recipients.
#[derive(Debug, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ServerFrame {
    pub fn new(kind: MessageKind, data: impl Serialize) -> Self {
        Self {
            kind,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> Arc<str> {
        Arc::from(serde_json::to_string(self).unwrap().as_str())
    }
}

// ---------------------------------------------------------------------------
// Chat payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_avatar: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl ChatMessagePayload {
    /// Outgoing payload carrying the canonical id/timestamp assigned by
    /// the persistence layer.
    pub fn from_record(
        record: &MessageRecord,
        recipient_id: Option<String>,
        group_id: Option<String>,
    ) -> Self {
        Self {
            id: record.id.clone(),
            chat_id: record.chat_id.clone(),
            sender_id: record.sender_id.clone(),
            sender_name: record.sender_name.clone(),
            sender_avatar: record.sender_avatar.clone(),
            content: record.content.clone(),
            message_type: record.message_type.clone(),
            timestamp: record.timestamp,
            is_read: record.is_read,
            recipient_id,
            group_id,
        }
    }
}

/// Message content kinds the store accepts. Anything else becomes text.
pub fn normalize_message_type(raw: &str) -> &'static str {
    match raw {
        "emoji" => "emoji",
        "media" => "media",
        "gif" => "gif",
        _ => "text",
    }
}

// ---------------------------------------------------------------------------
// Typing / presence payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusPayload {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat list / history payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChatListPayload {
    pub chats: Vec<Conversation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatHistoryRequest {
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatHistoryResponse {
    pub chat_id: String,
    pub messages: Vec<MessageRecord>,
    pub has_more: bool,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Read receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesReadPayload {
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// Group invitations (peer-relayed)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInvitationPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub inviter_id: String,
    #[serde(default)]
    pub inviter_name: String,
    #[serde(default)]
    pub invitee_id: String,
    #[serde(default)]
    pub invitee_name: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Group membership sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GroupSyncPayload {
    #[serde(default)]
    pub group_id: String,
}

// ---------------------------------------------------------------------------
// Peer-authored notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationRequest {
    #[serde(default)]
    pub recipient_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub ref_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationAck {
    pub status: &'static str,
    pub message: &'static str,
    pub id: String,
}

// ---------------------------------------------------------------------------
// Typed error payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: bool,
    pub category: &'static str,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(category: &'static str, message: impl Into<String>) -> Self {
        Self {
            error: true,
            category,
            message: message.into(),
        }
    }
}
