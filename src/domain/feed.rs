use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A feed is dropped from due-selection once it accumulates this many
/// consecutive failures, until a resume or manual refresh resets the count.
pub const ERROR_CEILING: u32 = 5;

/// Default refresh cadence for new subscriptions.
pub const DEFAULT_REFRESH_INTERVAL_MINUTES: i64 = 60;

/// Source type of a subscribed feed. Dispatch on this is exhaustive:
/// adding a variant forces every match site to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Web,
    Video,
    Forum,
    Audio,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Web => "web",
            FeedKind::Video => "video",
            FeedKind::Forum => "forum",
            FeedKind::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "web" => Some(FeedKind::Web),
            "video" => Some(FeedKind::Video),
            "forum" => Some(FeedKind::Forum),
            "audio" => Some(FeedKind::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub folder_id: Option<i64>,
    pub kind: FeedKind,
    pub url: String,
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
    pub icon_path: Option<String>,
    pub icon_content_type: Option<String>,
    pub refresh_interval_minutes: i64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub next_fetch_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Feed {
    pub fn new(user_id: i64, kind: FeedKind, url: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id,
            folder_id: None,
            kind,
            url,
            title: None,
            site_url: None,
            icon_url: None,
            icon_path: None,
            icon_content_type: None,
            refresh_interval_minutes: DEFAULT_REFRESH_INTERVAL_MINUTES,
            etag: None,
            last_modified: None,
            last_fetched_at: None,
            next_fetch_at: None,
            error_count: 0,
            last_error: None,
            last_error_at: None,
            paused_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// A feed at or above the error ceiling is excluded from scheduling,
    /// whatever its `next_fetch_at` says.
    pub fn circuit_open(&self) -> bool {
        self.error_count >= ERROR_CEILING
    }
}

/// Partial update of feed metadata discovered while normalizing a payload.
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct FeedMetaPatch {
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub icon_url: Option<String>,
}

/// Fetch-state bookkeeping written back after every refresh attempt.
#[derive(Debug, Clone)]
pub struct FeedStatePatch {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_fetched_at: DateTime<Utc>,
    pub next_fetch_at: DateTime<Utc>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}
