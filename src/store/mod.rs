pub mod maintenance;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{
    Article, Feed, FeedMetaPatch, FeedStatePatch, Folder, ReadState, RetentionPolicy,
};

pub use maintenance::{CompactReport, DbStats, OptimizeReport, FRAGMENTATION_THRESHOLD};
pub use sqlite::SqliteStore;

pub trait Store {
    // Feed operations
    fn add_feed(&self, feed: &Feed) -> Result<i64>;
    fn get_feed(&self, id: i64) -> Result<Option<Feed>>;
    fn get_feed_by_url(&self, user_id: i64, url: &str) -> Result<Option<Feed>>;
    fn list_feeds(&self, user_id: i64) -> Result<Vec<Feed>>;
    /// Feeds eligible for a scheduler tick: not deleted, not paused, under
    /// the error ceiling, past their next-fetch time; oldest due first.
    fn due_feeds(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Feed>>;
    fn update_feed_meta(&self, id: i64, patch: &FeedMetaPatch) -> Result<()>;
    fn update_feed_state(&self, id: i64, patch: &FeedStatePatch) -> Result<()>;
    fn set_feed_paused(&self, id: i64, paused: bool) -> Result<()>;
    /// Clears the error counter so a circuit-open feed re-enters scheduling.
    fn reset_feed_errors(&self, id: i64) -> Result<()>;
    fn soft_delete_feed(&self, id: i64) -> Result<()>;
    /// Admin-only hard delete; cascades to articles and read state.
    fn purge_feed(&self, id: i64) -> Result<()>;
    fn set_feed_icon_cache(&self, id: i64, url: &str, path: &str, content_type: &str)
        -> Result<()>;
    fn set_feed_folder(&self, id: i64, folder_id: Option<i64>) -> Result<()>;
    fn set_refresh_interval(&self, id: i64, minutes: i64) -> Result<()>;
    fn user_ids(&self) -> Result<Vec<i64>>;

    // Folder operations
    fn add_folder(&self, folder: &Folder) -> Result<i64>;
    fn get_folder(&self, id: i64) -> Result<Option<Folder>>;
    fn list_folders(&self, user_id: i64) -> Result<Vec<Folder>>;
    fn rename_folder(&self, id: i64, title: &str) -> Result<()>;
    fn soft_delete_folder(&self, id: i64) -> Result<()>;

    // Article operations
    fn add_articles(&self, articles: &[Article]) -> Result<usize>;
    fn get_article(&self, id: &str) -> Result<Option<Article>>;
    fn list_articles_by_feed(&self, feed_id: i64) -> Result<Vec<Article>>;
    fn article_count(&self, feed_id: i64) -> Result<i64>;
    fn set_readability_content(&self, id: &str, content: &str) -> Result<()>;
    fn set_article_thumbnail(&self, id: &str, url: &str, path: Option<&str>) -> Result<()>;

    // Read-state operations
    fn get_read_state(&self, user_id: i64, article_id: &str) -> Result<Option<ReadState>>;
    fn set_read(&self, user_id: i64, article_id: &str, is_read: bool) -> Result<()>;
    fn set_starred(&self, user_id: i64, article_id: &str, is_starred: bool) -> Result<()>;
    fn unread_count(&self, user_id: i64, feed_id: i64) -> Result<i64>;

    // Retention
    fn get_retention_policy(&self, user_id: i64) -> Result<RetentionPolicy>;
    fn set_retention_policy(&self, policy: &RetentionPolicy) -> Result<()>;
    fn delete_articles_older_than(
        &self,
        feed_id: i64,
        user_id: i64,
        cutoff: DateTime<Utc>,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64>;
    fn delete_articles_over_count(
        &self,
        feed_id: i64,
        user_id: i64,
        keep: i64,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64>;
    fn count_articles_older_than(
        &self,
        feed_id: i64,
        user_id: i64,
        cutoff: DateTime<Utc>,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64>;
    fn count_articles_over_count(
        &self,
        feed_id: i64,
        user_id: i64,
        keep: i64,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64>;

    // Sync delta queries. All comparisons are strict (>) against the
    // watermark so a row is never double-reported across windows.
    fn feeds_changed_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(Vec<Feed>, Vec<Feed>, Vec<i64>)>;
    fn folders_changed_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(Vec<Folder>, Vec<Folder>, Vec<i64>)>;
    fn articles_fetched_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Article>>;
    fn read_state_changed_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<(String, bool)>>;
}
