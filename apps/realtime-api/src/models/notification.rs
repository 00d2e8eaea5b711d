use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::notifications;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = notifications)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: String,
    pub sender_id: String,
    pub type_: String,
    pub ref_id: String,
    pub is_read: bool,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotificationRow<'a> {
    pub id: i64,
    pub user_id: &'a str,
    pub sender_id: &'a str,
    pub type_: &'a str,
    pub ref_id: &'a str,
    pub is_read: bool,
    pub message: &'a str,
    pub created_at: DateTime<Utc>,
}
