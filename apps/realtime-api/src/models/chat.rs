use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::{chat_participants, chat_threads, message_reads, messages};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = chat_threads)]
pub struct ChatThread {
    pub id: i64,
    pub is_group: bool,
    pub group_id: Option<String>,
    pub pair_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_threads)]
pub struct NewChatThread<'a> {
    pub id: i64,
    pub is_group: bool,
    pub group_id: Option<&'a str>,
    pub pair_key: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = chat_participants)]
pub struct NewChatParticipant<'a> {
    pub chat_id: i64,
    pub user_id: &'a str,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessageRow<'a> {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub message_type: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = message_reads)]
pub struct NewMessageRead<'a> {
    pub message_id: i64,
    pub user_id: &'a str,
    pub read_at: DateTime<Utc>,
}
