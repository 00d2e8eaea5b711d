//! In-memory `ChatStore` for tests and single-binary dev runs.
//!
//! One mutex guards all tables, so find-or-create and membership sync are
//! atomic the same way the Postgres transactions are.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;

use super::{
    canonical_pair_key, ChatStore, Conversation, MessageRecord, NotificationRecord, UserProfile,
    CONVERSATION_GROUP, CONVERSATION_PRIVATE, DEFAULT_GROUP_ICON,
};

struct GroupRecord {
    title: String,
    creator_id: String,
}

struct ThreadRecord {
    group_id: Option<String>,
    created_at: DateTime<Utc>,
}

struct StoredMessage {
    id: i64,
    chat_id: i64,
    sender_id: String,
    content: String,
    message_type: String,
    created_at: DateTime<Utc>,
}

struct StoredNotification {
    id: i64,
    user_id: String,
    sender_id: String,
    kind: String,
    ref_id: String,
    is_read: bool,
    message: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserProfile>,
    follows: HashSet<(String, String)>,
    groups: HashMap<String, GroupRecord>,
    group_members: HashMap<String, BTreeSet<String>>,
    threads: BTreeMap<i64, ThreadRecord>,
    pair_index: HashMap<String, i64>,
    group_index: HashMap<String, i64>,
    participants: HashMap<i64, Vec<String>>,
    messages: BTreeMap<i64, StoredMessage>,
    reads: HashSet<(i64, String)>,
    notifications: BTreeMap<i64, StoredNotification>,
}

pub struct MemoryStore {
    next_id: AtomicI64,
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // ----- seeding helpers (test fixtures) -----

    pub fn add_user(&self, id: &str, first_name: &str, last_name: &str, avatar: Option<&str>) {
        self.inner.lock().users.insert(
            id.to_string(),
            UserProfile {
                id: id.to_string(),
                display_name: format!("{first_name} {last_name}"),
                avatar: avatar.map(str::to_string),
            },
        );
    }

    /// Record an accepted follow edge from `follower` to `followee`.
    pub fn add_follow(&self, follower: &str, followee: &str) {
        self.inner
            .lock()
            .follows
            .insert((follower.to_string(), followee.to_string()));
    }

    pub fn add_group(&self, id: &str, title: &str, creator_id: &str, members: &[&str]) {
        let mut inner = self.inner.lock();
        inner.groups.insert(
            id.to_string(),
            GroupRecord {
                title: title.to_string(),
                creator_id: creator_id.to_string(),
            },
        );
        let entry = inner.group_members.entry(id.to_string()).or_default();
        entry.insert(creator_id.to_string());
        for m in members {
            entry.insert((*m).to_string());
        }
    }

    pub fn remove_group_member(&self, group_id: &str, user_id: &str) {
        if let Some(members) = self.inner.lock().group_members.get_mut(group_id) {
            members.remove(user_id);
        }
    }

    fn decorate(
        inner: &Inner,
        msg: &StoredMessage,
        viewer_id: &str,
    ) -> MessageRecord {
        let (sender_name, sender_avatar) = match inner.users.get(&msg.sender_id) {
            Some(p) => (p.display_name.clone(), p.avatar.clone().unwrap_or_default()),
            None => (String::new(), String::new()),
        };
        MessageRecord {
            id: msg.id.to_string(),
            chat_id: msg.chat_id.to_string(),
            sender_id: msg.sender_id.clone(),
            sender_name,
            sender_avatar,
            content: msg.content.clone(),
            message_type: msg.message_type.clone(),
            timestamp: msg.created_at,
            is_read: inner.reads.contains(&(msg.id, viewer_id.to_string())),
        }
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_or_create_private_thread(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<i64, StoreError> {
        let pair = canonical_pair_key(user_a, user_b);
        let id = self.alloc_id();
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.pair_index.get(&pair) {
            return Ok(*existing);
        }
        inner.pair_index.insert(pair, id);
        inner.threads.insert(
            id,
            ThreadRecord {
                group_id: None,
                created_at: Utc::now(),
            },
        );
        inner
            .participants
            .insert(id, vec![user_a.to_string(), user_b.to_string()]);
        Ok(id)
    }

    async fn find_or_create_group_thread(&self, group_id: &str) -> Result<i64, StoreError> {
        let id = self.alloc_id();
        let mut inner = self.inner.lock();
        if !inner.groups.contains_key(group_id) {
            return Err(StoreError::NotFound("group"));
        }
        if let Some(existing) = inner.group_index.get(group_id) {
            return Ok(*existing);
        }
        inner.group_index.insert(group_id.to_string(), id);
        inner.threads.insert(
            id,
            ThreadRecord {
                group_id: Some(group_id.to_string()),
                created_at: Utc::now(),
            },
        );
        let members: Vec<String> = inner
            .group_members
            .get(group_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        inner.participants.insert(id, members);
        Ok(id)
    }

    async fn group_thread_id(&self, group_id: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.inner.lock().group_index.get(group_id).copied())
    }

    async fn add_participant(&self, chat_id: i64, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.threads.contains_key(&chat_id) {
            return Err(StoreError::NotFound("chat thread"));
        }
        let members = inner.participants.entry(chat_id).or_default();
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
        }
        Ok(())
    }

    async fn remove_participant(&self, chat_id: i64, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(members) = inner.participants.get_mut(&chat_id) {
            members.retain(|m| m != user_id);
        }
        Ok(())
    }

    async fn participants(&self, chat_id: i64) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .participants
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_participant(&self, chat_id: i64, user_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .participants
            .get(&chat_id)
            .is_some_and(|m| m.iter().any(|p| p == user_id)))
    }

    async fn append_message(
        &self,
        chat_id: i64,
        sender_id: &str,
        content: &str,
        message_type: &str,
    ) -> Result<MessageRecord, StoreError> {
        let id = self.alloc_id();
        let mut inner = self.inner.lock();
        if !inner.threads.contains_key(&chat_id) {
            return Err(StoreError::NotFound("chat thread"));
        }
        let msg = StoredMessage {
            id,
            chat_id,
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            message_type: message_type.to_string(),
            created_at: Utc::now(),
        };
        let record = MemoryStore::decorate(&inner, &msg, sender_id);
        inner.messages.insert(id, msg);
        Ok(record)
    }

    async fn list_messages(
        &self,
        chat_id: i64,
        viewer_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .messages
            .values()
            .rev() // newest first; ids are monotonic
            .filter(|m| m.chat_id == chat_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|m| MemoryStore::decorate(&inner, m, viewer_id))
            .collect())
    }

    async fn message_count(&self, chat_id: i64) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .count() as i64)
    }

    async fn record_read(&self, message_id: i64, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.messages.contains_key(&message_id) {
            return Err(StoreError::NotFound("message"));
        }
        inner.reads.insert((message_id, user_id.to_string()));
        Ok(())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.inner.lock();
        let mut out = Vec::new();

        for (thread_id, thread) in &inner.threads {
            let participants = match inner.participants.get(thread_id) {
                Some(p) if p.iter().any(|m| m == user_id) => p.clone(),
                _ => continue,
            };

            let last = inner
                .messages
                .values()
                .rev()
                .find(|m| m.chat_id == *thread_id)
                .map(|m| MemoryStore::decorate(&inner, m, user_id));

            let unread_count = inner
                .messages
                .values()
                .filter(|m| {
                    m.chat_id == *thread_id
                        && m.sender_id != user_id
                        && !inner.reads.contains(&(m.id, user_id.to_string()))
                })
                .count() as i64;

            let conversation = match &thread.group_id {
                Some(group_id) => {
                    let title = inner
                        .groups
                        .get(group_id)
                        .map(|g| g.title.clone())
                        .unwrap_or_else(|| group_id.clone());
                    Conversation {
                        id: thread_id.to_string(),
                        kind: CONVERSATION_GROUP.to_string(),
                        name: title,
                        avatar: DEFAULT_GROUP_ICON.to_string(),
                        member_count: Some(participants.len()),
                        group_id: Some(group_id.clone()),
                        participants,
                        last_message: last,
                        unread_count,
                        is_online: false,
                    }
                }
                None => {
                    let other = participants.iter().find(|p| *p != user_id);
                    let (name, avatar) = other
                        .and_then(|o| inner.users.get(o))
                        .map(|p| (p.display_name.clone(), p.avatar.clone().unwrap_or_default()))
                        .unwrap_or_else(|| ("Private Chat".to_string(), String::new()));
                    Conversation {
                        id: thread_id.to_string(),
                        kind: CONVERSATION_PRIVATE.to_string(),
                        name,
                        avatar,
                        member_count: None,
                        group_id: None,
                        participants,
                        last_message: last,
                        unread_count,
                        is_online: false,
                    }
                }
            };
            out.push((thread.created_at, conversation));
        }

        // Most recently active first.
        out.sort_by(|(a_created, a), (b_created, b)| {
            let a_ts = a.last_message.as_ref().map(|m| m.timestamp).unwrap_or(*a_created);
            let b_ts = b.last_message.as_ref().map(|m| m.timestamp).unwrap_or(*b_created);
            b_ts.cmp(&a_ts)
        });
        Ok(out.into_iter().map(|(_, c)| c).collect())
    }

    async fn related_users(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let mut related = BTreeSet::new();
        for (follower, followee) in &inner.follows {
            if follower == user_id {
                related.insert(followee.clone());
            } else if followee == user_id {
                related.insert(follower.clone());
            }
        }
        Ok(related.into_iter().collect())
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.inner.lock().users.get(user_id).cloned())
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        let mut members: BTreeSet<String> = inner
            .group_members
            .get(group_id)
            .cloned()
            .unwrap_or_default();
        if let Some(group) = inner.groups.get(group_id) {
            members.insert(group.creator_id.clone());
        }
        Ok(members.into_iter().collect())
    }

    async fn append_notification(
        &self,
        recipient_id: &str,
        sender_id: &str,
        kind: &str,
        ref_id: &str,
        message: &str,
    ) -> Result<NotificationRecord, StoreError> {
        let id = self.alloc_id();
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.notifications.insert(
            id,
            StoredNotification {
                id,
                user_id: recipient_id.to_string(),
                sender_id: sender_id.to_string(),
                kind: kind.to_string(),
                ref_id: ref_id.to_string(),
                is_read: false,
                message: message.to_string(),
                created_at: now,
            },
        );
        Ok(NotificationRecord {
            id: id.to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            kind: kind.to_string(),
            ref_id: ref_id.to_string(),
            message: message.to_string(),
            is_read: false,
            timestamp: now,
            sender_avatar: String::new(),
        })
    }

    async fn list_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .notifications
            .values()
            .rev()
            .filter(|n| n.user_id == user_id)
            .map(|n| NotificationRecord {
                id: n.id.to_string(),
                sender_id: n.sender_id.clone(),
                recipient_id: n.user_id.clone(),
                kind: n.kind.clone(),
                ref_id: n.ref_id.clone(),
                message: n.message.clone(),
                is_read: n.is_read,
                timestamp: n.created_at,
                sender_avatar: String::new(),
            })
            .collect())
    }

    async fn mark_notification_read(&self, notification_id: i64) -> Result<(), StoreError> {
        match self.inner.lock().notifications.get_mut(&notification_id) {
            Some(n) => {
                n.is_read = true;
                Ok(())
            }
            None => Err(StoreError::NotFound("notification")),
        }
    }

    async fn update_notification_message(
        &self,
        notification_id: i64,
        message: &str,
    ) -> Result<(), StoreError> {
        match self.inner.lock().notifications.get_mut(&notification_id) {
            Some(n) => {
                n.message = message.to_string();
                Ok(())
            }
            None => Err(StoreError::NotFound("notification")),
        }
    }
}
