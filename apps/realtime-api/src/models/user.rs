use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::users;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Display name shown on chat messages and notifications.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
