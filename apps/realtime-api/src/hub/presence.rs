//! In-memory presence tracking.
//!
//! Presence is per-**user**, not per-session: a user goes offline only when
//! their last session disconnects, and their entry is pruned at that point.
//! Nothing here is persisted; after a restart everyone starts offline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::store::Conversation;

#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Presence table owned by the hub's routing state.
#[derive(Default)]
pub struct PresenceTable {
    records: HashMap<String, PresenceRecord>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&mut self, user_id: &str) {
        self.records.insert(
            user_id.to_string(),
            PresenceRecord {
                is_online: true,
                last_seen: Utc::now(),
            },
        );
    }

    /// Mark a still-connected user as not online (client-driven status).
    pub fn set_offline(&mut self, user_id: &str) {
        self.records.insert(
            user_id.to_string(),
            PresenceRecord {
                is_online: false,
                last_seen: Utc::now(),
            },
        );
    }

    /// Drop the user's entry entirely; called when their last session
    /// disconnects so no stale state survives.
    pub fn remove(&mut self, user_id: &str) {
        self.records.remove(user_id);
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.records.get(user_id).is_some_and(|r| r.is_online)
    }

    pub fn is_tracked(&self, user_id: &str) -> bool {
        self.records.contains_key(user_id)
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.records.get(user_id).map(|r| r.last_seen)
    }

    /// Annotate a user's conversation list with live online flags: a
    /// private chat is online when the other party is, a group chat when
    /// any participant besides the viewer is.
    pub fn annotate(&self, chats: &mut [Conversation], viewer_id: &str) {
        for chat in chats {
            chat.is_online = chat
                .participants
                .iter()
                .filter(|p| p.as_str() != viewer_id)
                .any(|p| self.is_online(p));
        }
    }
}
