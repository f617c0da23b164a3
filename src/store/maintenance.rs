//! Operator-facing database maintenance.
//!
//! Unlike the scheduled pipeline, these operations surface their failures
//! directly to the caller with a diagnostic and elapsed time.

use std::time::Instant;

use serde::Serialize;

use crate::app::{EstuaryError, Result};
use crate::store::sqlite::SqliteStore;

/// Compaction is refused below this free-page ratio unless forced.
pub const FRAGMENTATION_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub feeds: i64,
    pub articles: i64,
    pub folders: i64,
    pub read_state: i64,
    pub page_count: i64,
    pub freelist_count: i64,
    pub page_size: i64,
    pub size_bytes: i64,
    /// free pages / total pages; 0.0 for an empty database.
    pub fragmentation: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactReport {
    pub bytes_reclaimed: i64,
    pub elapsed_ms: u64,
}

impl SqliteStore {
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.conn()?;

        let count = |table: &str| -> Result<i64> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?)
        };

        let pragma = |name: &str| -> Result<i64> {
            Ok(conn.query_row(&format!("PRAGMA {name}"), [], |row| row.get(0))?)
        };

        let page_count = pragma("page_count")?;
        let freelist_count = pragma("freelist_count")?;
        let page_size = pragma("page_size")?;
        let fragmentation = if page_count > 0 {
            freelist_count as f64 / page_count as f64
        } else {
            0.0
        };

        Ok(DbStats {
            feeds: count("feeds")?,
            articles: count("articles")?,
            folders: count("folders")?,
            read_state: count("read_state")?,
            page_count,
            freelist_count,
            page_size,
            size_bytes: page_count * page_size,
            fragmentation,
        })
    }

    /// Refresh planner statistics and rebuild indexes. Safe to run anytime.
    pub fn optimize(&self) -> Result<OptimizeReport> {
        let started = Instant::now();
        let conn = self.conn()?;
        conn.execute_batch("ANALYZE; REINDEX;")?;
        Ok(OptimizeReport {
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Rewrite the database file to reclaim free pages. Refuses below the
    /// fragmentation threshold unless `force` is set, so callers don't pay
    /// for a full rewrite that reclaims nothing.
    pub fn compact(&self, force: bool) -> Result<CompactReport> {
        let before = self.stats()?;
        if !force && before.fragmentation < FRAGMENTATION_THRESHOLD {
            return Err(EstuaryError::Maintenance(format!(
                "fragmentation {:.1}% is below the {:.0}% threshold; nothing to reclaim",
                before.fragmentation * 100.0,
                FRAGMENTATION_THRESHOLD * 100.0
            )));
        }

        let started = Instant::now();
        {
            let conn = self.conn()?;
            conn.execute_batch("VACUUM")?;
        }
        let after = self.stats()?;

        Ok(CompactReport {
            bytes_reclaimed: (before.size_bytes - after.size_bytes).max(0),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{Article, Feed, FeedKind};
    use crate::store::Store;

    use super::*;

    #[test]
    fn stats_report_row_counts() {
        let store = SqliteStore::in_memory().unwrap();
        let feed_id = store
            .add_feed(&Feed::new(1, FeedKind::Web, "https://example.com/f".into()))
            .unwrap();
        let articles: Vec<Article> = (0..3)
            .map(|i| Article::new(feed_id, "https://example.com/f", &format!("g{i}")))
            .collect();
        store.add_articles(&articles).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.feeds, 1);
        assert_eq!(stats.articles, 3);
        assert!(stats.page_count > 0);
        assert!(stats.size_bytes > 0);
    }

    #[test]
    fn optimize_always_succeeds() {
        let store = SqliteStore::in_memory().unwrap();
        store.optimize().unwrap();
    }

    #[test]
    fn compact_refuses_unfragmented_db_unless_forced() {
        let store = SqliteStore::in_memory().unwrap();

        let refused = store.compact(false);
        assert!(matches!(refused, Err(EstuaryError::Maintenance(_))));

        let report = store.compact(true).unwrap();
        assert!(report.bytes_reclaimed >= 0);
    }

    #[test]
    fn compact_reclaims_after_bulk_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("estuary.db")).unwrap();

        let feed_id = store
            .add_feed(&Feed::new(1, FeedKind::Web, "https://example.com/f".into()))
            .unwrap();
        let articles: Vec<Article> = (0..200)
            .map(|i| {
                let mut a = Article::new(feed_id, "https://example.com/f", &format!("g{i}"));
                a.content = Some("x".repeat(4096));
                a
            })
            .collect();
        store.add_articles(&articles).unwrap();
        store.purge_feed(feed_id).unwrap();

        let report = store.compact(true).unwrap();
        assert!(report.bytes_reclaimed > 0);
    }
}
