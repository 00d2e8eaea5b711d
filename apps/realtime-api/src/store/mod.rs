//! Persistence gateway for chat threads, messages, read receipts, and
//! notifications.
//!
//! The hub consumes this narrow contract only; it never touches SQL.
//! Backed by Postgres in production and an in-memory store in tests.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Avatar used when a sender has none on file.
pub const DEFAULT_AVATAR: &str = "/images/default-avatar.jpg";
/// Icon used for group chats and group-authored notifications.
pub const DEFAULT_GROUP_ICON: &str = "/images/default-group.png";

/// Resolved display data for a user.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Avatar path with the default-asset fallback applied.
    pub fn avatar_or_default(&self) -> String {
        match self.avatar.as_deref() {
            Some(a) if !a.is_empty() => a.to_string(),
            _ => DEFAULT_AVATAR.to_string(),
        }
    }
}

/// A persisted chat message, decorated with sender display data and the
/// viewer's read state. Serializes straight onto the wire.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: String,
    pub content: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// One entry of a user's conversation list.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub avatar: String,
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageRecord>,
    pub unread_count: i64,
    /// Annotated by the hub from live presence; stores always return false.
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

pub const CONVERSATION_PRIVATE: &str = "private";
pub const CONVERSATION_GROUP: &str = "group";

/// A persisted notification addressed to one recipient.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ref_id: String,
    pub message: String,
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
    /// Filled in by the dispatcher at push time.
    pub sender_avatar: String,
}

/// Order-independent key identifying the private thread between two users.
///
/// Stored with a uniqueness constraint, so concurrent first-contacts
/// between the same pair converge on one thread regardless of the
/// underlying isolation level.
pub fn canonical_pair_key(user_a: &str, user_b: &str) -> String {
    if user_a <= user_b {
        format!("{user_a}:{user_b}")
    } else {
        format!("{user_b}:{user_a}")
    }
}

/// Data-access contract consumed by the realtime core.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // ----- thread resolution -----

    /// Find or atomically create the unique private thread between two
    /// users, inserting both as participants on creation.
    async fn find_or_create_private_thread(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<i64, StoreError>;

    /// Find or atomically create the unique thread for a group, seeding
    /// participants from the group's current member list plus its creator.
    async fn find_or_create_group_thread(&self, group_id: &str) -> Result<i64, StoreError>;

    /// Look up a group's thread without creating it.
    async fn group_thread_id(&self, group_id: &str) -> Result<Option<i64>, StoreError>;

    /// Add a participant. Re-adding an existing participant is a no-op.
    async fn add_participant(&self, chat_id: i64, user_id: &str) -> Result<(), StoreError>;

    /// Remove a participant. Removing an absent participant is a no-op.
    async fn remove_participant(&self, chat_id: i64, user_id: &str) -> Result<(), StoreError>;

    async fn participants(&self, chat_id: i64) -> Result<Vec<String>, StoreError>;

    async fn is_participant(&self, chat_id: i64, user_id: &str) -> Result<bool, StoreError>;

    // ----- messages -----

    /// Append a message. The store assigns the canonical id and timestamp;
    /// the returned record carries resolved sender display data.
    async fn append_message(
        &self,
        chat_id: i64,
        sender_id: &str,
        content: &str,
        message_type: &str,
    ) -> Result<MessageRecord, StoreError>;

    /// Page of messages, newest first, with `is_read` computed for the
    /// given viewer.
    async fn list_messages(
        &self,
        chat_id: i64,
        viewer_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, StoreError>;

    async fn message_count(&self, chat_id: i64) -> Result<i64, StoreError>;

    /// Record that a user has seen a message. Recording twice is a no-op.
    async fn record_read(&self, message_id: i64, user_id: &str) -> Result<(), StoreError>;

    // ----- conversations -----

    /// Conversation summaries for a user, most recently active first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;

    // ----- social graph & profiles -----

    /// Users who follow or are followed by the given user. This is the
    /// audience entitled to see their presence.
    async fn related_users(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    /// Current members of a group, including its creator.
    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError>;

    // ----- notifications -----

    async fn append_notification(
        &self,
        recipient_id: &str,
        sender_id: &str,
        kind: &str,
        ref_id: &str,
        message: &str,
    ) -> Result<NotificationRecord, StoreError>;

    async fn list_notifications(&self, user_id: &str)
        -> Result<Vec<NotificationRecord>, StoreError>;

    async fn mark_notification_read(&self, notification_id: i64) -> Result<(), StoreError>;

    async fn update_notification_message(
        &self,
        notification_id: i64,
        message: &str,
    ) -> Result<(), StoreError>;
}
