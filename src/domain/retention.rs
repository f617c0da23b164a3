use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::FeedKind;

/// Per-user retention policy. Disabled by default; the per-kind hard caps
/// in [`KindCaps`] apply regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub user_id: i64,
    pub enabled: bool,
    pub max_age_days: Option<i64>,
    pub max_per_feed: Option<i64>,
    pub keep_starred: bool,
    pub keep_unread: bool,
    pub updated_at: DateTime<Utc>,
}

impl RetentionPolicy {
    pub fn disabled(user_id: i64) -> Self {
        Self {
            user_id,
            enabled: false,
            max_age_days: None,
            max_per_feed: None,
            keep_starred: true,
            keep_unread: true,
            updated_at: Utc::now(),
        }
    }
}

/// Hard storage bounds per source kind, enforced independently of the user
/// policy. Starred articles are always exempt.
#[derive(Debug, Clone, Copy)]
pub struct KindCaps {
    pub max_age_days: Option<i64>,
    pub max_per_feed: Option<i64>,
}

impl KindCaps {
    /// Web and forum sources are bounded by age only; video by age and a
    /// per-feed count; audio by a per-feed count only.
    pub fn for_kind(kind: FeedKind) -> Self {
        match kind {
            FeedKind::Web => Self {
                max_age_days: Some(90),
                max_per_feed: None,
            },
            FeedKind::Forum => Self {
                max_age_days: Some(30),
                max_per_feed: None,
            },
            FeedKind::Video => Self {
                max_age_days: Some(90),
                max_per_feed: Some(200),
            },
            FeedKind::Audio => Self {
                max_age_days: None,
                max_per_feed: Some(100),
            },
        }
    }
}

/// Outcome of a retention run (or a preview of one).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub articles_deleted: u64,
    pub bytes_reclaimed: u64,
    pub compacted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_match_kind_shape() {
        let web = KindCaps::for_kind(FeedKind::Web);
        assert!(web.max_age_days.is_some() && web.max_per_feed.is_none());

        let forum = KindCaps::for_kind(FeedKind::Forum);
        assert!(forum.max_age_days.is_some() && forum.max_per_feed.is_none());

        let video = KindCaps::for_kind(FeedKind::Video);
        assert!(video.max_age_days.is_some() && video.max_per_feed.is_some());

        let audio = KindCaps::for_kind(FeedKind::Audio);
        assert!(audio.max_age_days.is_none() && audio.max_per_feed.is_some());
    }

    #[test]
    fn default_policy_keeps_everything() {
        let policy = RetentionPolicy::disabled(1);
        assert!(!policy.enabled);
        assert!(policy.keep_starred);
        assert!(policy.keep_unread);
    }
}
