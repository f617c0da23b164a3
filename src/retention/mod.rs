//! Storage-bound enforcement.
//!
//! Two independent layers: the user's own policy (age cutoff, per-feed
//! count cap, with starred/unread exemptions) and fixed per-kind caps that
//! apply whether or not the user opted in. Deletes run as discrete
//! per-feed statements, so a failure partway through leaves earlier
//! deletions in effect.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::app::Result;
use crate::domain::{Feed, KindCaps, RetentionReport};
use crate::store::{SqliteStore, Store};

/// A run that deletes at least this many rows asks for compaction.
pub const COMPACTION_DELETE_THRESHOLD: u64 = 500;

/// Apply the user's policy and the per-kind caps, deleting excess articles.
pub fn enforce(store: &SqliteStore, user_id: i64) -> Result<RetentionReport> {
    let report = run(store, user_id, false)?;

    if report.articles_deleted >= COMPACTION_DELETE_THRESHOLD {
        match store.compact(true) {
            Ok(compacted) => {
                info!(
                    bytes = compacted.bytes_reclaimed,
                    "compacted storage after retention run"
                );
                return Ok(RetentionReport {
                    bytes_reclaimed: compacted.bytes_reclaimed.max(0) as u64,
                    compacted: true,
                    ..report
                });
            }
            Err(err) => warn!(error = %err, "post-retention compaction failed"),
        }
    }

    Ok(report)
}

/// Compute what [`enforce`] would delete, without deleting anything.
pub fn preview(store: &SqliteStore, user_id: i64) -> Result<RetentionReport> {
    run(store, user_id, true)
}

fn run(store: &SqliteStore, user_id: i64, dry_run: bool) -> Result<RetentionReport> {
    let policy = store.get_retention_policy(user_id)?;
    let feeds = store.list_feeds(user_id)?;
    let now = Utc::now();
    let mut deleted = 0u64;

    let mut apply = |feed: &Feed,
                     cutoff_days: Option<i64>,
                     keep: Option<i64>,
                     keep_unread: bool,
                     keep_starred: bool|
     -> Result<u64> {
        let mut n = 0;
        if let Some(days) = cutoff_days {
            let cutoff = now - Duration::days(days);
            n += if dry_run {
                store.count_articles_older_than(feed.id, user_id, cutoff, keep_unread, keep_starred)?
            } else {
                store.delete_articles_older_than(feed.id, user_id, cutoff, keep_unread, keep_starred)?
            };
        }
        if let Some(keep) = keep {
            n += if dry_run {
                store.count_articles_over_count(feed.id, user_id, keep, keep_unread, keep_starred)?
            } else {
                store.delete_articles_over_count(feed.id, user_id, keep, keep_unread, keep_starred)?
            };
        }
        Ok(n)
    };

    for feed in &feeds {
        if policy.enabled {
            deleted += apply(
                feed,
                policy.max_age_days,
                policy.max_per_feed,
                policy.keep_unread,
                policy.keep_starred,
            )?;
        }

        // Kind caps always exempt starred articles and never unread ones.
        let caps = KindCaps::for_kind(feed.kind);
        deleted += apply(feed, caps.max_age_days, caps.max_per_feed, false, true)?;
    }

    if deleted > 0 {
        info!(user_id, deleted, dry_run, "retention pass finished");
    }

    Ok(RetentionReport {
        articles_deleted: deleted,
        bytes_reclaimed: 0,
        compacted: false,
    })
}
