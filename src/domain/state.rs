use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-(user, article) read/star flags. `updated_at` is the sync watermark:
/// every mutation bumps it, and conflicting writers resolve last-write-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadState {
    pub user_id: i64,
    pub article_id: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub starred_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ReadState {
    pub fn new(user_id: i64, article_id: String) -> Self {
        Self {
            user_id,
            article_id,
            is_read: false,
            is_starred: false,
            read_at: None,
            starred_at: None,
            updated_at: Utc::now(),
        }
    }
}
