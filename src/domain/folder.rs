use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Folder {
    pub fn new(user_id: i64, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            title,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
