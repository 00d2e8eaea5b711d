//! Postgres-backed `ChatStore` built on diesel-async.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::AsyncConnection;
use scoped_futures::ScopedFutureExt;

use linklet_common::SnowflakeGenerator;

use crate::db::pool::DbPool;
use crate::db::schema::{
    chat_participants, chat_threads, followers, group_members, groups, message_reads, messages,
    notifications, users,
};
use crate::error::StoreError;
use crate::models::chat::{
    ChatThread, MessageRow, NewChatParticipant, NewChatThread, NewMessageRead, NewMessageRow,
};
use crate::models::notification::{NewNotificationRow, NotificationRow};
use crate::models::user::User;

use super::{
    canonical_pair_key, ChatStore, Conversation, MessageRecord, NotificationRecord, UserProfile,
    CONVERSATION_GROUP, CONVERSATION_PRIVATE, DEFAULT_GROUP_ICON,
};

pub struct PgStore {
    pool: DbPool,
    ids: SnowflakeGenerator,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            ids: SnowflakeGenerator::new(0),
        }
    }

    fn message_record(row: MessageRow, sender: &User, is_read: bool) -> MessageRecord {
        MessageRecord {
            id: row.id.to_string(),
            chat_id: row.chat_id.to_string(),
            sender_id: row.sender_id,
            sender_name: sender.display_name(),
            sender_avatar: sender.avatar_path.clone().unwrap_or_default(),
            content: row.content,
            message_type: row.message_type,
            timestamp: row.created_at,
            is_read,
        }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn find_or_create_private_thread(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<i64, StoreError> {
        let pair = canonical_pair_key(user_a, user_b);
        let candidate_id = self.ids.generate();
        let now = Utc::now();
        let mut conn = self.pool.get().await?;

        conn.transaction::<i64, StoreError, _>(|conn| {
            async move {
                // The unique pair key makes this race-proof: whichever
                // concurrent caller loses the insert reads the winner's row.
                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(chat_threads::table)
                        .values(NewChatThread {
                            id: candidate_id,
                            is_group: false,
                            group_id: None,
                            pair_key: Some(pair.as_str()),
                            created_at: now,
                        })
                        .on_conflict(chat_threads::pair_key)
                        .do_nothing(),
                    conn,
                )
                .await?;

                let thread_id: i64 = diesel_async::RunQueryDsl::get_result(
                    chat_threads::table
                        .filter(chat_threads::pair_key.eq(&pair))
                        .select(chat_threads::id),
                    conn,
                )
                .await?;

                let rows = vec![
                    NewChatParticipant {
                        chat_id: thread_id,
                        user_id: user_a,
                        joined_at: now,
                    },
                    NewChatParticipant {
                        chat_id: thread_id,
                        user_id: user_b,
                        joined_at: now,
                    },
                ];
                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(chat_participants::table)
                        .values(&rows)
                        .on_conflict_do_nothing(),
                    conn,
                )
                .await?;

                Ok(thread_id)
            }
            .scope_boxed()
        })
        .await
    }

    async fn find_or_create_group_thread(&self, group_id: &str) -> Result<i64, StoreError> {
        let candidate_id = self.ids.generate();
        let now = Utc::now();
        let mut conn = self.pool.get().await?;

        conn.transaction::<i64, StoreError, _>(|conn| {
            async move {
                let creator_id: String = diesel_async::RunQueryDsl::get_result(
                    groups::table.find(group_id).select(groups::creator_id),
                    conn,
                )
                .await
                .optional()?
                .ok_or(StoreError::NotFound("group"))?;

                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(chat_threads::table)
                        .values(NewChatThread {
                            id: candidate_id,
                            is_group: true,
                            group_id: Some(group_id),
                            pair_key: None,
                            created_at: now,
                        })
                        .on_conflict(chat_threads::group_id)
                        .do_nothing(),
                    conn,
                )
                .await?;

                let thread_id: i64 = diesel_async::RunQueryDsl::get_result(
                    chat_threads::table
                        .filter(chat_threads::group_id.eq(group_id))
                        .select(chat_threads::id),
                    conn,
                )
                .await?;

                let mut member_ids: Vec<String> = diesel_async::RunQueryDsl::load(
                    group_members::table
                        .filter(group_members::group_id.eq(group_id))
                        .select(group_members::user_id),
                    conn,
                )
                .await?;
                if !member_ids.iter().any(|m| *m == creator_id) {
                    member_ids.push(creator_id);
                }

                let rows: Vec<NewChatParticipant> = member_ids
                    .iter()
                    .map(|user_id| NewChatParticipant {
                        chat_id: thread_id,
                        user_id,
                        joined_at: now,
                    })
                    .collect();
                diesel_async::RunQueryDsl::execute(
                    diesel::insert_into(chat_participants::table)
                        .values(&rows)
                        .on_conflict_do_nothing(),
                    conn,
                )
                .await?;

                Ok(thread_id)
            }
            .scope_boxed()
        })
        .await
    }

    async fn group_thread_id(&self, group_id: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(diesel_async::RunQueryDsl::get_result(
            chat_threads::table
                .filter(chat_threads::group_id.eq(group_id))
                .select(chat_threads::id),
            &mut conn,
        )
        .await
        .optional()?)
    }

    async fn add_participant(&self, chat_id: i64, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(chat_participants::table)
                .values(NewChatParticipant {
                    chat_id,
                    user_id,
                    joined_at: Utc::now(),
                })
                .on_conflict_do_nothing(),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn remove_participant(&self, chat_id: i64, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::delete(
                chat_participants::table
                    .filter(chat_participants::chat_id.eq(chat_id))
                    .filter(chat_participants::user_id.eq(user_id)),
            ),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn participants(&self, chat_id: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(diesel_async::RunQueryDsl::load(
            chat_participants::table
                .filter(chat_participants::chat_id.eq(chat_id))
                .select(chat_participants::user_id),
            &mut conn,
        )
        .await?)
    }

    async fn is_participant(&self, chat_id: i64, user_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = diesel_async::RunQueryDsl::get_result(
            chat_participants::table
                .filter(chat_participants::chat_id.eq(chat_id))
                .filter(chat_participants::user_id.eq(user_id))
                .count(),
            &mut conn,
        )
        .await?;
        Ok(count > 0)
    }

    async fn append_message(
        &self,
        chat_id: i64,
        sender_id: &str,
        content: &str,
        message_type: &str,
    ) -> Result<MessageRecord, StoreError> {
        let mut conn = self.pool.get().await?;

        let sender: User = diesel_async::RunQueryDsl::get_result(
            users::table.find(sender_id).select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?
        .ok_or(StoreError::NotFound("user"))?;

        let row: MessageRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(messages::table)
                .values(NewMessageRow {
                    id: self.ids.generate(),
                    chat_id,
                    sender_id,
                    content,
                    message_type,
                    created_at: Utc::now(),
                })
                .returning(MessageRow::as_returning()),
            &mut conn,
        )
        .await?;

        Ok(Self::message_record(row, &sender, false))
    }

    async fn list_messages(
        &self,
        chat_id: i64,
        viewer_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(MessageRow, User, Option<i64>)> = diesel_async::RunQueryDsl::load(
            messages::table
                .inner_join(users::table)
                .left_join(
                    message_reads::table.on(message_reads::message_id
                        .eq(messages::id)
                        .and(message_reads::user_id.eq(viewer_id))),
                )
                .filter(messages::chat_id.eq(chat_id))
                .order(messages::id.desc())
                .limit(limit)
                .offset(offset)
                .select((
                    MessageRow::as_select(),
                    User::as_select(),
                    message_reads::message_id.nullable(),
                )),
            &mut conn,
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|(row, sender, read)| Self::message_record(row, &sender, read.is_some()))
            .collect())
    }

    async fn message_count(&self, chat_id: i64) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(diesel_async::RunQueryDsl::get_result(
            messages::table.filter(messages::chat_id.eq(chat_id)).count(),
            &mut conn,
        )
        .await?)
    }

    async fn record_read(&self, message_id: i64, user_id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(message_reads::table)
                .values(NewMessageRead {
                    message_id,
                    user_id,
                    read_at: Utc::now(),
                })
                .on_conflict_do_nothing(),
            &mut conn,
        )
        .await?;
        Ok(())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut conn = self.pool.get().await?;

        let thread_ids: Vec<i64> = diesel_async::RunQueryDsl::load(
            chat_participants::table
                .filter(chat_participants::user_id.eq(user_id))
                .select(chat_participants::chat_id),
            &mut conn,
        )
        .await?;
        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let threads: Vec<ChatThread> = diesel_async::RunQueryDsl::load(
            chat_threads::table
                .filter(chat_threads::id.eq_any(&thread_ids))
                .select(ChatThread::as_select()),
            &mut conn,
        )
        .await?;

        let member_rows: Vec<(i64, String)> = diesel_async::RunQueryDsl::load(
            chat_participants::table
                .filter(chat_participants::chat_id.eq_any(&thread_ids))
                .select((chat_participants::chat_id, chat_participants::user_id)),
            &mut conn,
        )
        .await?;
        let mut members_by_thread: HashMap<i64, Vec<String>> = HashMap::new();
        for (tid, uid) in member_rows {
            members_by_thread.entry(tid).or_default().push(uid);
        }

        // Group titles for group threads.
        let group_ids: Vec<&str> = threads
            .iter()
            .filter_map(|t| t.group_id.as_deref())
            .collect();
        let mut titles: HashMap<String, String> = HashMap::new();
        if !group_ids.is_empty() {
            let rows: Vec<(String, String)> = diesel_async::RunQueryDsl::load(
                groups::table
                    .filter(groups::id.eq_any(&group_ids))
                    .select((groups::id, groups::title)),
                &mut conn,
            )
            .await?;
            titles.extend(rows);
        }

        // Profiles of "the other participant" for private threads.
        let other_ids: Vec<String> = threads
            .iter()
            .filter(|t| t.group_id.is_none())
            .filter_map(|t| {
                members_by_thread
                    .get(&t.id)
                    .and_then(|m| m.iter().find(|p| *p != user_id).cloned())
            })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut profiles: HashMap<String, User> = HashMap::new();
        if !other_ids.is_empty() {
            let rows: Vec<User> = diesel_async::RunQueryDsl::load(
                users::table
                    .filter(users::id.eq_any(&other_ids))
                    .select(User::as_select()),
                &mut conn,
            )
            .await?;
            profiles.extend(rows.into_iter().map(|u| (u.id.clone(), u)));
        }
        drop(conn);

        let mut out: Vec<(chrono::DateTime<Utc>, Conversation)> = Vec::new();
        for thread in threads {
            let tid = thread.id;
            let created_at = thread.created_at;
            let participants = members_by_thread.remove(&tid).unwrap_or_default();
            let last_message = self.list_messages(tid, user_id, 1, 0).await?.into_iter().next();
            let unread_count = self.unread_count(tid, user_id).await?;

            let conversation = match thread.group_id {
                Some(gid) => Conversation {
                    id: tid.to_string(),
                    kind: CONVERSATION_GROUP.to_string(),
                    name: titles.get(&gid).cloned().unwrap_or_else(|| gid.clone()),
                    avatar: DEFAULT_GROUP_ICON.to_string(),
                    member_count: Some(participants.len()),
                    group_id: Some(gid),
                    participants,
                    last_message,
                    unread_count,
                    is_online: false,
                },
                None => {
                    let other = participants.iter().find(|p| *p != user_id);
                    let (name, avatar) = other
                        .and_then(|o| profiles.get(o))
                        .map(|u| (u.display_name(), u.avatar_path.clone().unwrap_or_default()))
                        .unwrap_or_else(|| ("Private Chat".to_string(), String::new()));
                    Conversation {
                        id: tid.to_string(),
                        kind: CONVERSATION_PRIVATE.to_string(),
                        name,
                        avatar,
                        member_count: None,
                        group_id: None,
                        participants,
                        last_message,
                        unread_count,
                        is_online: false,
                    }
                }
            };
            out.push((created_at, conversation));
        }

        out.sort_by(|(a_created, a), (b_created, b)| {
            let a_ts = a.last_message.as_ref().map(|m| m.timestamp).unwrap_or(*a_created);
            let b_ts = b.last_message.as_ref().map(|m| m.timestamp).unwrap_or(*b_created);
            b_ts.cmp(&a_ts)
        });
        Ok(out.into_iter().map(|(_, c)| c).collect())
    }

    async fn related_users(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;

        let followees: Vec<String> = diesel_async::RunQueryDsl::load(
            followers::table
                .filter(followers::follower_id.eq(user_id))
                .select(followers::followee_id),
            &mut conn,
        )
        .await?;
        let followers_of: Vec<String> = diesel_async::RunQueryDsl::load(
            followers::table
                .filter(followers::followee_id.eq(user_id))
                .select(followers::follower_id),
            &mut conn,
        )
        .await?;

        let mut related: Vec<String> = followees
            .into_iter()
            .chain(followers_of)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        related.sort();
        Ok(related)
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user: Option<User> = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user.map(|u| UserProfile {
            display_name: u.display_name(),
            id: u.id,
            avatar: u.avatar_path,
        }))
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;

        let creator: Option<String> = diesel_async::RunQueryDsl::get_result(
            groups::table.find(group_id).select(groups::creator_id),
            &mut conn,
        )
        .await
        .optional()?;

        let mut members: Vec<String> = diesel_async::RunQueryDsl::load(
            group_members::table
                .filter(group_members::group_id.eq(group_id))
                .select(group_members::user_id),
            &mut conn,
        )
        .await?;
        if let Some(creator) = creator {
            if !members.iter().any(|m| *m == creator) {
                members.push(creator);
            }
        }
        Ok(members)
    }

    async fn append_notification(
        &self,
        recipient_id: &str,
        sender_id: &str,
        kind: &str,
        ref_id: &str,
        message: &str,
    ) -> Result<NotificationRecord, StoreError> {
        let mut conn = self.pool.get().await?;
        let row: NotificationRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(notifications::table)
                .values(NewNotificationRow {
                    id: self.ids.generate(),
                    user_id: recipient_id,
                    sender_id,
                    type_: kind,
                    ref_id,
                    is_read: false,
                    message,
                    created_at: Utc::now(),
                })
                .returning(NotificationRow::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(notification_record(row))
    }

    async fn list_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows: Vec<NotificationRow> = diesel_async::RunQueryDsl::load(
            notifications::table
                .filter(notifications::user_id.eq(user_id))
                .order(notifications::created_at.desc())
                .select(NotificationRow::as_select()),
            &mut conn,
        )
        .await?;
        Ok(rows.into_iter().map(notification_record).collect())
    }

    async fn mark_notification_read(&self, notification_id: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel_async::RunQueryDsl::execute(
            diesel::update(notifications::table.find(notification_id))
                .set(notifications::is_read.eq(true)),
            &mut conn,
        )
        .await?;
        if updated == 0 {
            return Err(StoreError::NotFound("notification"));
        }
        Ok(())
    }

    async fn update_notification_message(
        &self,
        notification_id: i64,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel_async::RunQueryDsl::execute(
            diesel::update(notifications::table.find(notification_id))
                .set(notifications::message.eq(message)),
            &mut conn,
        )
        .await?;
        if updated == 0 {
            return Err(StoreError::NotFound("notification"));
        }
        Ok(())
    }
}

impl PgStore {
    async fn unread_count(&self, chat_id: i64, user_id: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await?;
        Ok(diesel_async::RunQueryDsl::get_result(
            messages::table
                .left_join(
                    message_reads::table.on(message_reads::message_id
                        .eq(messages::id)
                        .and(message_reads::user_id.eq(user_id))),
                )
                .filter(messages::chat_id.eq(chat_id))
                .filter(messages::sender_id.ne(user_id))
                .filter(message_reads::message_id.nullable().is_null())
                .count(),
            &mut conn,
        )
        .await?)
    }
}

fn notification_record(row: NotificationRow) -> NotificationRecord {
    NotificationRecord {
        id: row.id.to_string(),
        sender_id: row.sender_id,
        recipient_id: row.user_id,
        kind: row.type_,
        ref_id: row.ref_id,
        message: row.message,
        is_read: row.is_read,
        timestamp: row.created_at,
        sender_avatar: String::new(),
    }
}
