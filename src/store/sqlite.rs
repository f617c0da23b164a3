use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{EstuaryError, Result};
use crate::domain::{
    Article, Enclosure, Feed, FeedKind, FeedMetaPatch, FeedStatePatch, Folder, ReadState,
    RetentionPolicy, ERROR_CEILING,
};
use crate::store::Store;

const FEED_COLUMNS: &str = "id, user_id, folder_id, kind, url, title, site_url, icon_url, \
     icon_path, icon_content_type, refresh_interval_minutes, etag, last_modified, \
     last_fetched_at, next_fetch_at, error_count, last_error, last_error_at, paused_at, \
     deleted_at, created_at, updated_at";

const ARTICLE_COLUMNS: &str = "id, feed_id, guid, title, url, author, summary, content, \
     readability_content, enclosure_url, enclosure_type, enclosure_length, \
     enclosure_duration_secs, thumbnail_url, thumbnail_path, published_at, fetched_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        // WAL is a no-op for in-memory databases; ignore the reported mode.
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| EstuaryError::Other(format!("migration failed: {e}")))?;

        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EstuaryError::Other("storage lock poisoned".into()))
    }

    fn fmt_ts(dt: DateTime<Utc>) -> String {
        // Fixed-width fractional seconds keep lexicographic order equal to
        // chronological order, which the watermark comparisons rely on.
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn fmt_ts_opt(dt: Option<DateTime<Utc>>) -> Option<String> {
        dt.map(Self::fmt_ts)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
        Ok(row
            .get::<_, Option<String>>(idx)?
            .and_then(|s| Self::parse_datetime(&s)))
    }

    fn get_ts_required(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
        Ok(row
            .get::<_, String>(idx)
            .ok()
            .and_then(|s| Self::parse_datetime(&s))
            .unwrap_or_else(Utc::now))
    }

    fn row_to_feed(row: &Row) -> rusqlite::Result<Feed> {
        Ok(Feed {
            id: row.get(0)?,
            user_id: row.get(1)?,
            folder_id: row.get(2)?,
            kind: row
                .get::<_, String>(3)
                .ok()
                .and_then(|s| FeedKind::parse(&s))
                .unwrap_or(FeedKind::Web),
            url: row.get(4)?,
            title: row.get(5)?,
            site_url: row.get(6)?,
            icon_url: row.get(7)?,
            icon_path: row.get(8)?,
            icon_content_type: row.get(9)?,
            refresh_interval_minutes: row.get(10)?,
            etag: row.get(11)?,
            last_modified: row.get(12)?,
            last_fetched_at: Self::get_ts(row, 13)?,
            next_fetch_at: Self::get_ts(row, 14)?,
            error_count: row.get(15)?,
            last_error: row.get(16)?,
            last_error_at: Self::get_ts(row, 17)?,
            paused_at: Self::get_ts(row, 18)?,
            deleted_at: Self::get_ts(row, 19)?,
            created_at: Self::get_ts_required(row, 20)?,
            updated_at: Self::get_ts_required(row, 21)?,
        })
    }

    fn row_to_article(row: &Row) -> rusqlite::Result<Article> {
        let enclosure = row
            .get::<_, Option<String>>(9)?
            .map(|url| -> rusqlite::Result<Enclosure> {
                Ok(Enclosure {
                    url,
                    content_type: row.get(10)?,
                    length: row.get(11)?,
                    duration_secs: row.get(12)?,
                })
            })
            .transpose()?;

        Ok(Article {
            id: row.get(0)?,
            feed_id: row.get(1)?,
            guid: row.get(2)?,
            title: row.get(3)?,
            url: row.get(4)?,
            author: row.get(5)?,
            summary: row.get(6)?,
            content: row.get(7)?,
            readability_content: row.get(8)?,
            enclosure,
            thumbnail_url: row.get(13)?,
            thumbnail_path: row.get(14)?,
            published_at: Self::get_ts(row, 15)?,
            fetched_at: Self::get_ts_required(row, 16)?,
        })
    }

    fn row_to_folder(row: &Row) -> rusqlite::Result<Folder> {
        Ok(Folder {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            created_at: Self::get_ts_required(row, 3)?,
            updated_at: Self::get_ts_required(row, 4)?,
            deleted_at: Self::get_ts(row, 5)?,
        })
    }

    // Shared WHERE fragment for the retention statements. ?3 gates the
    // keep-unread exemption, ?4 the keep-starred one, ?5 is the owning user.
    const RETENTION_GUARDS: &'static str = " AND (?3 = 0 OR id IN \
         (SELECT article_id FROM read_state WHERE user_id = ?5 AND is_read = 1)) \
         AND (?4 = 0 OR id NOT IN \
         (SELECT article_id FROM read_state WHERE user_id = ?5 AND is_starred = 1))";
}

impl Store for SqliteStore {
    fn add_feed(&self, feed: &Feed) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO feeds (user_id, folder_id, kind, url, title, site_url, icon_url, \
             refresh_interval_minutes, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                feed.user_id,
                feed.folder_id,
                feed.kind.as_str(),
                feed.url,
                feed.title,
                feed.site_url,
                feed.icon_url,
                feed.refresh_interval_minutes,
                Self::fmt_ts(feed.created_at),
                Self::fmt_ts(feed.updated_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        let feed = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                params![id],
                Self::row_to_feed,
            )
            .optional()?;
        Ok(feed)
    }

    fn get_feed_by_url(&self, user_id: i64, url: &str) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        let feed = conn
            .query_row(
                &format!(
                    "SELECT {FEED_COLUMNS} FROM feeds \
                     WHERE user_id = ?1 AND url = ?2 AND deleted_at IS NULL"
                ),
                params![user_id, url],
                Self::row_to_feed,
            )
            .optional()?;
        Ok(feed)
    }

    fn list_feeds(&self, user_id: i64) -> Result<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE user_id = ?1 AND deleted_at IS NULL ORDER BY title, url"
        ))?;
        let feeds = stmt
            .query_map(params![user_id], Self::row_to_feed)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    fn due_feeds(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE deleted_at IS NULL AND paused_at IS NULL \
               AND error_count < ?1 \
               AND (next_fetch_at IS NULL OR next_fetch_at <= ?2) \
             ORDER BY next_fetch_at ASC \
             LIMIT ?3"
        ))?;
        let feeds = stmt
            .query_map(
                params![ERROR_CEILING, Self::fmt_ts(now), limit as i64],
                Self::row_to_feed,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    fn update_feed_meta(&self, id: i64, patch: &FeedMetaPatch) -> Result<()> {
        let conn = self.conn()?;
        if let Some(ref title) = patch.title {
            conn.execute(
                "UPDATE feeds SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, Self::fmt_ts(Utc::now()), id],
            )?;
        }
        if let Some(ref site_url) = patch.site_url {
            conn.execute(
                "UPDATE feeds SET site_url = ?1, updated_at = ?2 WHERE id = ?3",
                params![site_url, Self::fmt_ts(Utc::now()), id],
            )?;
        }
        if let Some(ref icon_url) = patch.icon_url {
            conn.execute(
                "UPDATE feeds SET icon_url = ?1, updated_at = ?2 WHERE id = ?3",
                params![icon_url, Self::fmt_ts(Utc::now()), id],
            )?;
        }
        Ok(())
    }

    fn update_feed_state(&self, id: i64, patch: &FeedStatePatch) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET etag = ?1, last_modified = ?2, last_fetched_at = ?3, \
             next_fetch_at = ?4, error_count = ?5, last_error = ?6, last_error_at = ?7, \
             updated_at = ?8 WHERE id = ?9",
            params![
                patch.etag,
                patch.last_modified,
                Self::fmt_ts(patch.last_fetched_at),
                Self::fmt_ts(patch.next_fetch_at),
                patch.error_count,
                patch.last_error,
                Self::fmt_ts_opt(patch.last_error_at),
                Self::fmt_ts(Utc::now()),
                id,
            ],
        )?;
        Ok(())
    }

    fn set_feed_paused(&self, id: i64, paused: bool) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::fmt_ts(Utc::now());
        let paused_at = paused.then(|| now.clone());
        conn.execute(
            "UPDATE feeds SET paused_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![paused_at, now, id],
        )?;
        Ok(())
    }

    fn reset_feed_errors(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET error_count = 0, last_error = NULL, last_error_at = NULL, \
             updated_at = ?1 WHERE id = ?2",
            params![Self::fmt_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    fn soft_delete_feed(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::fmt_ts(Utc::now());
        conn.execute(
            "UPDATE feeds SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    fn purge_feed(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn set_feed_icon_cache(
        &self,
        id: i64,
        url: &str,
        path: &str,
        content_type: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET icon_url = ?1, icon_path = ?2, icon_content_type = ?3, \
             updated_at = ?4 WHERE id = ?5",
            params![url, path, content_type, Self::fmt_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    fn set_feed_folder(&self, id: i64, folder_id: Option<i64>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET folder_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![folder_id, Self::fmt_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    fn set_refresh_interval(&self, id: i64, minutes: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE feeds SET refresh_interval_minutes = ?1, updated_at = ?2 WHERE id = ?3",
            params![minutes.max(1), Self::fmt_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    fn user_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT user_id FROM feeds WHERE deleted_at IS NULL")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn add_folder(&self, folder: &Folder) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO folders (user_id, title, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                folder.user_id,
                folder.title,
                Self::fmt_ts(folder.created_at),
                Self::fmt_ts(folder.updated_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_folder(&self, id: i64) -> Result<Option<Folder>> {
        let conn = self.conn()?;
        let folder = conn
            .query_row(
                "SELECT id, user_id, title, created_at, updated_at, deleted_at \
                 FROM folders WHERE id = ?1",
                params![id],
                Self::row_to_folder,
            )
            .optional()?;
        Ok(folder)
    }

    fn list_folders(&self, user_id: i64) -> Result<Vec<Folder>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at, updated_at, deleted_at \
             FROM folders WHERE user_id = ?1 AND deleted_at IS NULL ORDER BY title",
        )?;
        let folders = stmt
            .query_map(params![user_id], Self::row_to_folder)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    fn rename_folder(&self, id: i64, title: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE folders SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, Self::fmt_ts(Utc::now()), id],
        )?;
        Ok(())
    }

    fn soft_delete_folder(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::fmt_ts(Utc::now());
        conn.execute(
            "UPDATE folders SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        conn.execute(
            "UPDATE feeds SET folder_id = NULL, updated_at = ?1 WHERE folder_id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    fn add_articles(&self, articles: &[Article]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;

        for article in articles {
            let (enc_url, enc_type, enc_len, enc_dur) = match &article.enclosure {
                Some(e) => (
                    Some(e.url.as_str()),
                    e.content_type.as_deref(),
                    e.length,
                    e.duration_secs,
                ),
                None => (None, None, None, None),
            };
            // Duplicate guids are expected re-deliveries, not errors.
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO articles (id, feed_id, guid, title, url, author, \
                 summary, content, readability_content, enclosure_url, enclosure_type, \
                 enclosure_length, enclosure_duration_secs, thumbnail_url, thumbnail_path, \
                 published_at, fetched_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    article.id,
                    article.feed_id,
                    article.guid,
                    article.title,
                    article.url,
                    article.author,
                    article.summary,
                    article.content,
                    article.readability_content,
                    enc_url,
                    enc_type,
                    enc_len,
                    enc_dur,
                    article.thumbnail_url,
                    article.thumbnail_path,
                    Self::fmt_ts_opt(article.published_at),
                    Self::fmt_ts(article.fetched_at),
                ],
            )?;
            count += inserted;
        }

        tx.commit()?;
        Ok(count)
    }

    fn get_article(&self, id: &str) -> Result<Option<Article>> {
        let conn = self.conn()?;
        let article = conn
            .query_row(
                &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"),
                params![id],
                Self::row_to_article,
            )
            .optional()?;
        Ok(article)
    }

    fn list_articles_by_feed(&self, feed_id: i64) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE feed_id = ?1 \
             ORDER BY published_at DESC, fetched_at DESC"
        ))?;
        let articles = stmt
            .query_map(params![feed_id], Self::row_to_article)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(articles)
    }

    fn article_count(&self, feed_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE feed_id = ?1",
            params![feed_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn set_readability_content(&self, id: &str, content: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE articles SET readability_content = ?1 WHERE id = ?2",
            params![content, id],
        )?;
        Ok(())
    }

    fn set_article_thumbnail(&self, id: &str, url: &str, path: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE articles SET thumbnail_url = ?1, thumbnail_path = ?2 WHERE id = ?3",
            params![url, path, id],
        )?;
        Ok(())
    }

    fn get_read_state(&self, user_id: i64, article_id: &str) -> Result<Option<ReadState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT user_id, article_id, is_read, is_starred, read_at, starred_at, \
                 updated_at FROM read_state WHERE user_id = ?1 AND article_id = ?2",
                params![user_id, article_id],
                |row| {
                    Ok(ReadState {
                        user_id: row.get(0)?,
                        article_id: row.get(1)?,
                        is_read: row.get::<_, i32>(2)? != 0,
                        is_starred: row.get::<_, i32>(3)? != 0,
                        read_at: Self::get_ts(row, 4)?,
                        starred_at: Self::get_ts(row, 5)?,
                        updated_at: Self::get_ts_required(row, 6)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn set_read(&self, user_id: i64, article_id: &str, is_read: bool) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::fmt_ts(Utc::now());
        let read_at = is_read.then(|| now.clone());
        conn.execute(
            "INSERT INTO read_state (user_id, article_id, is_read, read_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id, article_id) \
             DO UPDATE SET is_read = ?3, read_at = ?4, updated_at = ?5",
            params![user_id, article_id, is_read as i32, read_at, now],
        )?;
        Ok(())
    }

    fn set_starred(&self, user_id: i64, article_id: &str, is_starred: bool) -> Result<()> {
        let conn = self.conn()?;
        let now = Self::fmt_ts(Utc::now());
        let starred_at = is_starred.then(|| now.clone());
        conn.execute(
            "INSERT INTO read_state (user_id, article_id, is_starred, starred_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id, article_id) \
             DO UPDATE SET is_starred = ?3, starred_at = ?4, updated_at = ?5",
            params![user_id, article_id, is_starred as i32, starred_at, now],
        )?;
        Ok(())
    }

    fn unread_count(&self, user_id: i64, feed_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM articles a \
             LEFT JOIN read_state s ON a.id = s.article_id AND s.user_id = ?1 \
             WHERE a.feed_id = ?2 AND (s.is_read IS NULL OR s.is_read = 0)",
            params![user_id, feed_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn get_retention_policy(&self, user_id: i64) -> Result<RetentionPolicy> {
        let conn = self.conn()?;
        let policy = conn
            .query_row(
                "SELECT user_id, enabled, max_age_days, max_per_feed, keep_starred, \
                 keep_unread, updated_at FROM retention_settings WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(RetentionPolicy {
                        user_id: row.get(0)?,
                        enabled: row.get::<_, i32>(1)? != 0,
                        max_age_days: row.get(2)?,
                        max_per_feed: row.get(3)?,
                        keep_starred: row.get::<_, i32>(4)? != 0,
                        keep_unread: row.get::<_, i32>(5)? != 0,
                        updated_at: Self::get_ts_required(row, 6)?,
                    })
                },
            )
            .optional()?;
        Ok(policy.unwrap_or_else(|| RetentionPolicy::disabled(user_id)))
    }

    fn set_retention_policy(&self, policy: &RetentionPolicy) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO retention_settings (user_id, enabled, max_age_days, max_per_feed, \
             keep_starred, keep_unread, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(user_id) DO UPDATE SET enabled = ?2, max_age_days = ?3, \
             max_per_feed = ?4, keep_starred = ?5, keep_unread = ?6, updated_at = ?7",
            params![
                policy.user_id,
                policy.enabled as i32,
                policy.max_age_days,
                policy.max_per_feed,
                policy.keep_starred as i32,
                policy.keep_unread as i32,
                Self::fmt_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    fn delete_articles_older_than(
        &self,
        feed_id: i64,
        user_id: i64,
        cutoff: DateTime<Utc>,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            &format!(
                "DELETE FROM articles WHERE feed_id = ?1 \
                 AND COALESCE(published_at, fetched_at) < ?2{}",
                Self::RETENTION_GUARDS
            ),
            params![
                feed_id,
                Self::fmt_ts(cutoff),
                keep_unread as i32,
                keep_starred as i32,
                user_id,
            ],
        )?;
        Ok(deleted as u64)
    }

    fn delete_articles_over_count(
        &self,
        feed_id: i64,
        user_id: i64,
        keep: i64,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            &format!(
                "DELETE FROM articles WHERE feed_id = ?1 \
                 AND id NOT IN (SELECT id FROM articles WHERE feed_id = ?1 \
                 ORDER BY COALESCE(published_at, fetched_at) DESC LIMIT ?2){}",
                Self::RETENTION_GUARDS
            ),
            params![
                feed_id,
                keep.max(0),
                keep_unread as i32,
                keep_starred as i32,
                user_id,
            ],
        )?;
        Ok(deleted as u64)
    }

    fn count_articles_older_than(
        &self,
        feed_id: i64,
        user_id: i64,
        cutoff: DateTime<Utc>,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM articles WHERE feed_id = ?1 \
                 AND COALESCE(published_at, fetched_at) < ?2{}",
                Self::RETENTION_GUARDS
            ),
            params![
                feed_id,
                Self::fmt_ts(cutoff),
                keep_unread as i32,
                keep_starred as i32,
                user_id,
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_articles_over_count(
        &self,
        feed_id: i64,
        user_id: i64,
        keep: i64,
        keep_unread: bool,
        keep_starred: bool,
    ) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM articles WHERE feed_id = ?1 \
                 AND id NOT IN (SELECT id FROM articles WHERE feed_id = ?1 \
                 ORDER BY COALESCE(published_at, fetched_at) DESC LIMIT ?2){}",
                Self::RETENTION_GUARDS
            ),
            params![
                feed_id,
                keep.max(0),
                keep_unread as i32,
                keep_starred as i32,
                user_id,
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn feeds_changed_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(Vec<Feed>, Vec<Feed>, Vec<i64>)> {
        let conn = self.conn()?;
        let w = Self::fmt_ts(watermark);

        let mut stmt = conn.prepare(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE user_id = ?1 AND deleted_at IS NULL AND created_at > ?2"
        ))?;
        let created = stmt
            .query_map(params![user_id, w], Self::row_to_feed)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds \
             WHERE user_id = ?1 AND deleted_at IS NULL \
               AND updated_at > ?2 AND created_at <= ?2"
        ))?;
        let updated = stmt
            .query_map(params![user_id, w], Self::row_to_feed)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn
            .prepare("SELECT id FROM feeds WHERE user_id = ?1 AND deleted_at > ?2")?;
        let deleted = stmt
            .query_map(params![user_id, w], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((created, updated, deleted))
    }

    fn folders_changed_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<(Vec<Folder>, Vec<Folder>, Vec<i64>)> {
        let conn = self.conn()?;
        let w = Self::fmt_ts(watermark);
        const COLS: &str = "id, user_id, title, created_at, updated_at, deleted_at";

        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM folders \
             WHERE user_id = ?1 AND deleted_at IS NULL AND created_at > ?2"
        ))?;
        let created = stmt
            .query_map(params![user_id, w], Self::row_to_folder)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {COLS} FROM folders \
             WHERE user_id = ?1 AND deleted_at IS NULL \
               AND updated_at > ?2 AND created_at <= ?2"
        ))?;
        let updated = stmt
            .query_map(params![user_id, w], Self::row_to_folder)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = conn
            .prepare("SELECT id FROM folders WHERE user_id = ?1 AND deleted_at > ?2")?;
        let deleted = stmt
            .query_map(params![user_id, w], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((created, updated, deleted))
    }

    fn articles_fetched_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM articles a \
             JOIN feeds f ON f.id = a.feed_id \
             WHERE f.user_id = ?1 AND f.deleted_at IS NULL AND a.fetched_at > ?2 \
             ORDER BY a.fetched_at DESC LIMIT ?3",
            ARTICLE_COLUMNS
                .split(", ")
                .map(|c| format!("a.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let articles = stmt
            .query_map(
                params![user_id, Self::fmt_ts(watermark), limit as i64],
                Self::row_to_article,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(articles)
    }

    fn read_state_changed_since(
        &self,
        user_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<(String, bool)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT article_id, is_read FROM read_state \
             WHERE user_id = ?1 AND updated_at > ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, Self::fmt_ts(watermark)], |row| {
                Ok((row.get(0)?, row.get::<_, i32>(1)? != 0))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn sample_feed(user_id: i64, url: &str) -> Feed {
        Feed::new(user_id, FeedKind::Web, url.into())
    }

    fn sample_article(feed_id: i64, guid: &str) -> Article {
        Article::new(feed_id, "https://example.com/feed.xml", guid)
    }

    #[test]
    fn add_and_get_feed() {
        let store = store();
        let id = store
            .add_feed(&sample_feed(1, "https://example.com/feed.xml"))
            .unwrap();
        let feed = store.get_feed(id).unwrap().unwrap();
        assert_eq!(feed.url, "https://example.com/feed.xml");
        assert_eq!(feed.kind, FeedKind::Web);
        assert_eq!(feed.error_count, 0);
    }

    #[test]
    fn get_feed_by_url_scoped_to_user() {
        let store = store();
        store
            .add_feed(&sample_feed(1, "https://example.com/feed.xml"))
            .unwrap();

        assert!(store
            .get_feed_by_url(1, "https://example.com/feed.xml")
            .unwrap()
            .is_some());
        assert!(store
            .get_feed_by_url(2, "https://example.com/feed.xml")
            .unwrap()
            .is_none());
    }

    #[test]
    fn due_selection_honors_next_fetch_ordering() {
        let store = store();
        let now = Utc::now();

        let early = store.add_feed(&sample_feed(1, "https://a.example/feed")).unwrap();
        let late = store.add_feed(&sample_feed(1, "https://b.example/feed")).unwrap();

        for (id, offset) in [(early, -30), (late, -10)] {
            let patch = FeedStatePatch {
                etag: None,
                last_modified: None,
                last_fetched_at: now,
                next_fetch_at: now + Duration::minutes(offset),
                error_count: 0,
                last_error: None,
                last_error_at: None,
            };
            store.update_feed_state(id, &patch).unwrap();
        }

        let due = store.due_feeds(now, 10).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, early);
        assert_eq!(due[1].id, late);
    }

    #[test]
    fn due_selection_skips_paused_deleted_and_future() {
        let store = store();
        let now = Utc::now();

        let paused = store.add_feed(&sample_feed(1, "https://p.example/feed")).unwrap();
        store.set_feed_paused(paused, true).unwrap();

        let deleted = store.add_feed(&sample_feed(1, "https://d.example/feed")).unwrap();
        store.soft_delete_feed(deleted).unwrap();

        let future = store.add_feed(&sample_feed(1, "https://f.example/feed")).unwrap();
        store
            .update_feed_state(
                future,
                &FeedStatePatch {
                    etag: None,
                    last_modified: None,
                    last_fetched_at: now,
                    next_fetch_at: now + Duration::minutes(60),
                    error_count: 0,
                    last_error: None,
                    last_error_at: None,
                },
            )
            .unwrap();

        assert!(store.due_feeds(now, 10).unwrap().is_empty());
    }

    #[test]
    fn circuit_open_feed_is_never_due() {
        let store = store();
        let now = Utc::now();
        let id = store.add_feed(&sample_feed(1, "https://broken.example/feed")).unwrap();

        // Past due, but at the error ceiling.
        store
            .update_feed_state(
                id,
                &FeedStatePatch {
                    etag: None,
                    last_modified: None,
                    last_fetched_at: now,
                    next_fetch_at: now - Duration::minutes(60),
                    error_count: ERROR_CEILING,
                    last_error: Some("boom".into()),
                    last_error_at: Some(now),
                },
            )
            .unwrap();
        assert!(store.due_feeds(now, 10).unwrap().is_empty());

        // Resume clears the circuit.
        store.reset_feed_errors(id).unwrap();
        assert_eq!(store.due_feeds(now, 10).unwrap().len(), 1);
    }

    #[test]
    fn add_articles_deduplicates_on_guid() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();

        let articles: Vec<Article> = (0..3)
            .map(|i| sample_article(feed_id, &format!("guid-{i}")))
            .collect();

        assert_eq!(store.add_articles(&articles).unwrap(), 3);
        // Re-ingesting the same payload inserts nothing.
        assert_eq!(store.add_articles(&articles).unwrap(), 0);
        assert_eq!(store.article_count(feed_id).unwrap(), 3);
    }

    #[test]
    fn duplicate_article_keeps_original_row() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();

        let mut original = sample_article(feed_id, "guid-1");
        original.title = Some("Original".into());
        store.add_articles(std::slice::from_ref(&original)).unwrap();

        let mut dup = sample_article(feed_id, "guid-1");
        dup.title = Some("Changed".into());
        store.add_articles(&[dup]).unwrap();

        let stored = store.get_article(&original.id).unwrap().unwrap();
        assert_eq!(stored.title, Some("Original".into()));
    }

    #[test]
    fn enclosure_round_trips() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();

        let mut article = sample_article(feed_id, "ep-1");
        article.enclosure = Some(Enclosure {
            url: "https://example.com/ep1.mp3".into(),
            content_type: Some("audio/mpeg".into()),
            length: Some(1234),
            duration_secs: Some(3600),
        });
        store.add_articles(std::slice::from_ref(&article)).unwrap();

        let stored = store.get_article(&article.id).unwrap().unwrap();
        let enclosure = stored.enclosure.unwrap();
        assert_eq!(enclosure.url, "https://example.com/ep1.mp3");
        assert_eq!(enclosure.duration_secs, Some(3600));
    }

    #[test]
    fn readability_fill_in() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let article = sample_article(feed_id, "g1");
        store.add_articles(std::slice::from_ref(&article)).unwrap();

        store
            .set_readability_content(&article.id, "<p>Full text</p>")
            .unwrap();
        let stored = store.get_article(&article.id).unwrap().unwrap();
        assert_eq!(stored.readability_content, Some("<p>Full text</p>".into()));
    }

    #[test]
    fn read_state_upsert_bumps_updated_at() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let article = sample_article(feed_id, "g1");
        store.add_articles(std::slice::from_ref(&article)).unwrap();

        store.set_read(1, &article.id, true).unwrap();
        let first = store.get_read_state(1, &article.id).unwrap().unwrap();
        assert!(first.is_read);

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.set_read(1, &article.id, false).unwrap();
        let second = store.get_read_state(1, &article.id).unwrap().unwrap();
        assert!(!second.is_read);
        assert!(second.updated_at > first.updated_at);
    }

    #[test]
    fn starring_is_independent_of_read_flag() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let article = sample_article(feed_id, "g1");
        store.add_articles(std::slice::from_ref(&article)).unwrap();

        store.set_read(1, &article.id, true).unwrap();
        store.set_starred(1, &article.id, true).unwrap();

        let state = store.get_read_state(1, &article.id).unwrap().unwrap();
        assert!(state.is_read);
        assert!(state.is_starred);
        assert!(state.starred_at.is_some());
    }

    #[test]
    fn unread_count_is_per_user() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let articles: Vec<Article> = (0..4)
            .map(|i| sample_article(feed_id, &format!("g{i}")))
            .collect();
        store.add_articles(&articles).unwrap();

        store.set_read(1, &articles[0].id, true).unwrap();
        store.set_read(2, &articles[0].id, true).unwrap();
        store.set_read(2, &articles[1].id, true).unwrap();

        assert_eq!(store.unread_count(1, feed_id).unwrap(), 3);
        assert_eq!(store.unread_count(2, feed_id).unwrap(), 2);
    }

    #[test]
    fn retention_age_delete_respects_exemptions() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let old = Utc::now() - Duration::days(100);

        let mut articles = Vec::new();
        for i in 0..3 {
            let mut a = sample_article(feed_id, &format!("g{i}"));
            a.published_at = Some(old);
            articles.push(a);
        }
        store.add_articles(&articles).unwrap();

        // g0 read, g1 starred+read, g2 unread.
        store.set_read(1, &articles[0].id, true).unwrap();
        store.set_read(1, &articles[1].id, true).unwrap();
        store.set_starred(1, &articles[1].id, true).unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        let deleted = store
            .delete_articles_older_than(feed_id, 1, cutoff, true, true)
            .unwrap();

        // Only the read, unstarred article goes.
        assert_eq!(deleted, 1);
        assert!(store.get_article(&articles[0].id).unwrap().is_none());
        assert!(store.get_article(&articles[1].id).unwrap().is_some());
        assert!(store.get_article(&articles[2].id).unwrap().is_some());
    }

    #[test]
    fn retention_count_delete_keeps_newest() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();

        let mut articles = Vec::new();
        for i in 0..5 {
            let mut a = sample_article(feed_id, &format!("g{i}"));
            a.published_at = Some(Utc::now() - Duration::days(10 - i));
            articles.push(a);
        }
        store.add_articles(&articles).unwrap();

        let deleted = store
            .delete_articles_over_count(feed_id, 1, 2, false, false)
            .unwrap();
        assert_eq!(deleted, 3);

        // The two most recently published survive.
        assert!(store.get_article(&articles[4].id).unwrap().is_some());
        assert!(store.get_article(&articles[3].id).unwrap().is_some());
        assert!(store.get_article(&articles[0].id).unwrap().is_none());
    }

    #[test]
    fn count_preview_matches_delete() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();

        let mut articles = Vec::new();
        for i in 0..5 {
            let mut a = sample_article(feed_id, &format!("g{i}"));
            a.published_at = Some(Utc::now() - Duration::days(10));
            articles.push(a);
        }
        store.add_articles(&articles).unwrap();

        let cutoff = Utc::now() - Duration::days(5);
        let preview = store
            .count_articles_older_than(feed_id, 1, cutoff, false, false)
            .unwrap();
        let deleted = store
            .delete_articles_older_than(feed_id, 1, cutoff, false, false)
            .unwrap();
        assert_eq!(preview, deleted);
        assert_eq!(deleted, 5);
    }

    #[test]
    fn retention_policy_defaults_to_disabled() {
        let store = store();
        let policy = store.get_retention_policy(42).unwrap();
        assert!(!policy.enabled);

        let mut custom = policy;
        custom.enabled = true;
        custom.max_age_days = Some(30);
        store.set_retention_policy(&custom).unwrap();

        let stored = store.get_retention_policy(42).unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.max_age_days, Some(30));
    }

    #[test]
    fn feed_sync_partitions_created_updated_deleted() {
        let store = store();
        let before = Utc::now() - Duration::seconds(1);

        let created_id = store.add_feed(&sample_feed(1, "https://new.example/feed")).unwrap();

        let (created, updated, deleted) = store.feeds_changed_since(1, before).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, created_id);
        assert!(updated.is_empty());
        assert!(deleted.is_empty());

        // After the watermark passes creation, a metadata change reports as
        // updated, never as created again.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let watermark = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .update_feed_meta(
                created_id,
                &FeedMetaPatch {
                    title: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let (created, updated, deleted) = store.feeds_changed_since(1, watermark).unwrap();
        assert!(created.is_empty());
        assert_eq!(updated.len(), 1);
        assert!(deleted.is_empty());

        // Deletion reports only the id.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let watermark = Utc::now();
        store.soft_delete_feed(created_id).unwrap();
        let (created, updated, deleted) = store.feeds_changed_since(1, watermark).unwrap();
        assert!(created.is_empty());
        assert!(updated.is_empty());
        assert_eq!(deleted, vec![created_id]);
    }

    #[test]
    fn folder_rename_reports_exactly_one_update() {
        let store = store();
        let id = store.add_folder(&Folder::new(1, "News".into())).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let watermark = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.rename_folder(id, "World News").unwrap();

        let (created, updated, deleted) = store.folders_changed_since(1, watermark).unwrap();
        assert!(created.is_empty());
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].title, "World News");
        assert!(deleted.is_empty());
    }

    #[test]
    fn articles_fetched_since_is_scoped_and_capped() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let other = store.add_feed(&sample_feed(2, "https://other.example/feed")).unwrap();

        let watermark = Utc::now() - Duration::seconds(10);
        let articles: Vec<Article> = (0..5)
            .map(|i| sample_article(feed_id, &format!("g{i}")))
            .collect();
        store.add_articles(&articles).unwrap();
        store
            .add_articles(&[Article::new(other, "https://other.example/feed", "x")])
            .unwrap();

        let synced = store.articles_fetched_since(1, watermark, 3).unwrap();
        assert_eq!(synced.len(), 3);
        assert!(synced.iter().all(|a| a.feed_id == feed_id));

        let all = store.articles_fetched_since(1, watermark, 500).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn read_state_changes_partition_by_flag() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let articles: Vec<Article> = (0..2)
            .map(|i| sample_article(feed_id, &format!("g{i}")))
            .collect();
        store.add_articles(&articles).unwrap();

        let watermark = Utc::now() - Duration::seconds(10);
        store.set_read(1, &articles[0].id, true).unwrap();
        store.set_read(1, &articles[1].id, false).unwrap();

        let changes = store.read_state_changed_since(1, watermark).unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|(id, read)| id == &articles[0].id && *read));
        assert!(changes.iter().any(|(id, read)| id == &articles[1].id && !*read));
    }

    #[test]
    fn purge_feed_cascades() {
        let store = store();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        let article = sample_article(feed_id, "g1");
        store.add_articles(std::slice::from_ref(&article)).unwrap();
        store.set_read(1, &article.id, true).unwrap();

        store.purge_feed(feed_id).unwrap();
        assert!(store.get_feed(feed_id).unwrap().is_none());
        assert!(store.get_article(&article.id).unwrap().is_none());
        assert!(store.get_read_state(1, &article.id).unwrap().is_none());
    }

    #[test]
    fn soft_deleted_folder_detaches_feeds() {
        let store = store();
        let folder_id = store.add_folder(&Folder::new(1, "Tech".into())).unwrap();
        let feed_id = store.add_feed(&sample_feed(1, "https://example.com/feed.xml")).unwrap();
        store.set_feed_folder(feed_id, Some(folder_id)).unwrap();

        store.soft_delete_folder(folder_id).unwrap();
        assert!(store.list_folders(1).unwrap().is_empty());
        assert_eq!(store.get_feed(feed_id).unwrap().unwrap().folder_id, None);
    }
}
