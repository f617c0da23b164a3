//! Incremental sync protocol.
//!
//! Clients hold an opaque cursor and ask for everything that changed since
//! it. Every window boundary is a single server-clock read taken at
//! response construction, and all row comparisons are strictly
//! greater-than, so progress is monotonic even when nothing changed and a
//! row is never reported in two windows.

pub mod cursor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::Result;
use crate::domain::{Article, Feed, Folder};
use crate::store::Store;

pub use cursor::SyncCursor;

/// Articles are capped per response; clients needing more re-sync with the
/// advanced cursor.
pub const SYNC_PAGE_SIZE: usize = 500;

/// Which entity kinds a sync request wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeSet {
    pub feeds: bool,
    pub folders: bool,
    pub articles: bool,
    pub read_state: bool,
}

impl Default for IncludeSet {
    fn default() -> Self {
        Self {
            feeds: true,
            folders: true,
            articles: true,
            read_state: true,
        }
    }
}

impl IncludeSet {
    /// Parse a comma-separated include list. An empty string selects
    /// everything; unknown names are ignored.
    pub fn parse(s: &str) -> Self {
        if s.trim().is_empty() {
            return Self::default();
        }
        let mut set = Self {
            feeds: false,
            folders: false,
            articles: false,
            read_state: false,
        };
        for name in s.split(',') {
            match name.trim() {
                "feeds" => set.feeds = true,
                "folders" => set.folders = true,
                "articles" => set.articles = true,
                "read_state" => set.read_state = true,
                _ => {}
            }
        }
        set
    }
}

#[derive(Debug, Default, Serialize)]
pub struct FeedChanges {
    pub created: Vec<Feed>,
    pub updated: Vec<Feed>,
    pub deleted: Vec<i64>,
}

#[derive(Debug, Default, Serialize)]
pub struct FolderChanges {
    pub created: Vec<Folder>,
    pub updated: Vec<Folder>,
    pub deleted: Vec<i64>,
}

#[derive(Debug, Default, Serialize)]
pub struct ReadStateChanges {
    pub read: Vec<String>,
    pub unread: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangeSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feeds: Option<FeedChanges>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folders: Option<FolderChanges>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub articles: Option<Vec<Article>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_state: Option<ReadStateChanges>,
    pub next_cursor: String,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadStateDelta {
    pub article_id: String,
    pub is_read: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct PushSummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// Compute the delta since the client's cursor.
pub fn get_changes<S: Store>(
    store: &S,
    user_id: i64,
    cursor: Option<&str>,
    include: &IncludeSet,
) -> Result<ChangeSet> {
    let watermark = SyncCursor::decode(cursor).watermark();

    // The next cursor is stamped before reading any partition: concurrent
    // writes landing mid-response reappear in the next window rather than
    // being skipped.
    let server_time = Utc::now();

    let feeds = if include.feeds {
        let (created, updated, deleted) = store.feeds_changed_since(user_id, watermark)?;
        Some(FeedChanges {
            created,
            updated,
            deleted,
        })
    } else {
        None
    };

    let folders = if include.folders {
        let (created, updated, deleted) = store.folders_changed_since(user_id, watermark)?;
        Some(FolderChanges {
            created,
            updated,
            deleted,
        })
    } else {
        None
    };

    let articles = if include.articles {
        Some(store.articles_fetched_since(user_id, watermark, SYNC_PAGE_SIZE)?)
    } else {
        None
    };

    let read_state = if include.read_state {
        let mut changes = ReadStateChanges::default();
        for (article_id, is_read) in store.read_state_changed_since(user_id, watermark)? {
            if is_read {
                changes.read.push(article_id);
            } else {
                changes.unread.push(article_id);
            }
        }
        Some(changes)
    } else {
        None
    };

    Ok(ChangeSet {
        feeds,
        folders,
        articles,
        read_state,
        next_cursor: SyncCursor::at(server_time).encode(),
        server_time,
    })
}

/// Apply client-pushed read-state deltas. Each row is an independent
/// idempotent upsert; one bad row never aborts the batch.
pub fn push_changes<S: Store>(
    store: &S,
    user_id: i64,
    deltas: &[ReadStateDelta],
) -> PushSummary {
    let mut summary = PushSummary::default();

    for delta in deltas {
        let known = matches!(store.get_article(&delta.article_id), Ok(Some(_)));
        if !known {
            debug!(article_id = %delta.article_id, "rejecting read-state for unknown article");
            summary.rejected += 1;
            continue;
        }
        match store.set_read(user_id, &delta.article_id, delta.is_read) {
            Ok(()) => summary.accepted += 1,
            Err(err) => {
                debug!(article_id = %delta.article_id, error = %err, "read-state push failed");
                summary.rejected += 1;
            }
        }
    }

    summary
}
