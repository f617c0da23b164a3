//! Per-feed fetch-state bookkeeping.
//!
//! Pure computation: callers persist the returned patch. Failures advance
//! `next_fetch_at` by the normal interval rather than an escalating curve;
//! load shedding comes from the error ceiling alone, which drops the feed
//! from due-selection until an explicit resume.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Feed, FeedStatePatch};

/// Result of one refresh attempt, as seen by the state machine.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Fresh content was ingested; validators from the response, if any.
    Success {
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// Origin reported no change. Stored validators stay as they are.
    NotModified,
    /// The attempt failed with this diagnostic.
    Failure(String),
}

pub fn compute_next_fetch(
    feed: &Feed,
    outcome: AttemptOutcome,
    retry_after: Option<std::time::Duration>,
    now: DateTime<Utc>,
) -> FeedStatePatch {
    let interval = Duration::minutes(feed.refresh_interval_minutes.max(1));

    // A server-provided hint only stretches the schedule, never shortens it.
    let delay = match retry_after.and_then(|d| Duration::from_std(d).ok()) {
        Some(hint) if hint > interval => hint,
        _ => interval,
    };
    let next_fetch_at = now + delay;

    match outcome {
        AttemptOutcome::Success {
            etag,
            last_modified,
        } => FeedStatePatch {
            etag: etag.or_else(|| feed.etag.clone()),
            last_modified: last_modified.or_else(|| feed.last_modified.clone()),
            last_fetched_at: now,
            next_fetch_at,
            error_count: 0,
            last_error: None,
            last_error_at: None,
        },
        AttemptOutcome::NotModified => FeedStatePatch {
            etag: feed.etag.clone(),
            last_modified: feed.last_modified.clone(),
            last_fetched_at: now,
            next_fetch_at,
            error_count: 0,
            last_error: None,
            last_error_at: None,
        },
        AttemptOutcome::Failure(diagnostic) => FeedStatePatch {
            etag: feed.etag.clone(),
            last_modified: feed.last_modified.clone(),
            last_fetched_at: now,
            next_fetch_at,
            error_count: feed.error_count + 1,
            last_error: Some(diagnostic),
            last_error_at: Some(now),
        },
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{FeedKind, ERROR_CEILING};

    use super::*;

    fn feed_with_interval(minutes: i64) -> Feed {
        let mut feed = Feed::new(1, FeedKind::Web, "https://example.com/feed.xml".into());
        feed.refresh_interval_minutes = minutes;
        feed
    }

    #[test]
    fn success_resets_errors_and_schedules_one_interval_out() {
        let mut feed = feed_with_interval(15);
        feed.error_count = 3;
        feed.last_error = Some("old failure".into());
        let now = Utc::now();

        let patch = compute_next_fetch(
            &feed,
            AttemptOutcome::Success {
                etag: Some("\"v2\"".into()),
                last_modified: None,
            },
            None,
            now,
        );

        assert_eq!(patch.error_count, 0);
        assert_eq!(patch.last_error, None);
        assert_eq!(patch.next_fetch_at, now + Duration::minutes(15));
        assert_eq!(patch.etag.as_deref(), Some("\"v2\""));
    }

    #[test]
    fn success_without_validators_keeps_previous_ones() {
        let mut feed = feed_with_interval(15);
        feed.etag = Some("\"v1\"".into());
        feed.last_modified = Some("Mon, 01 Jan 2024 00:00:00 GMT".into());

        let patch = compute_next_fetch(
            &feed,
            AttemptOutcome::Success {
                etag: None,
                last_modified: None,
            },
            None,
            Utc::now(),
        );

        assert_eq!(patch.etag.as_deref(), Some("\"v1\""));
        assert!(patch.last_modified.is_some());
    }

    #[test]
    fn not_modified_is_success_with_untouched_validators() {
        let mut feed = feed_with_interval(15);
        feed.etag = Some("\"v1\"".into());
        let now = Utc::now();

        let patch = compute_next_fetch(&feed, AttemptOutcome::NotModified, None, now);

        assert_eq!(patch.error_count, 0);
        assert_eq!(patch.etag.as_deref(), Some("\"v1\""));
        assert_eq!(patch.next_fetch_at, now + Duration::minutes(15));
    }

    #[test]
    fn failure_increments_count_but_keeps_normal_cadence() {
        let mut feed = feed_with_interval(15);
        let now = Utc::now();

        // The worked example: success at T, then consecutive failures each
        // advancing by the plain interval.
        for expected_count in 1..=ERROR_CEILING {
            let patch = compute_next_fetch(
                &feed,
                AttemptOutcome::Failure("connect timeout".into()),
                None,
                now,
            );
            assert_eq!(patch.error_count, expected_count);
            assert_eq!(patch.next_fetch_at, now + Duration::minutes(15));
            assert!(patch.last_error.is_some());
            assert_eq!(patch.last_error_at, Some(now));
            feed.error_count = patch.error_count;
        }

        assert!(feed.error_count >= ERROR_CEILING);
    }

    #[test]
    fn retry_after_stretches_schedule_when_larger() {
        let feed = feed_with_interval(15);
        let now = Utc::now();

        let patch = compute_next_fetch(
            &feed,
            AttemptOutcome::Success {
                etag: None,
                last_modified: None,
            },
            Some(std::time::Duration::from_secs(3600)),
            now,
        );
        assert_eq!(patch.next_fetch_at, now + Duration::hours(1));

        // A hint shorter than the interval is ignored.
        let patch = compute_next_fetch(
            &feed,
            AttemptOutcome::Success {
                etag: None,
                last_modified: None,
            },
            Some(std::time::Duration::from_secs(60)),
            now,
        );
        assert_eq!(patch.next_fetch_at, now + Duration::minutes(15));
    }

    #[test]
    fn next_fetch_never_precedes_now() {
        let feed = feed_with_interval(1);
        let now = Utc::now();
        for outcome in [
            AttemptOutcome::Success {
                etag: None,
                last_modified: None,
            },
            AttemptOutcome::NotModified,
            AttemptOutcome::Failure("x".into()),
        ] {
            let patch = compute_next_fetch(&feed, outcome, None, now);
            assert!(patch.next_fetch_at >= now);
        }
    }
}
