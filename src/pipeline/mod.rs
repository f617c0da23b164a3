//! The per-feed refresh pipeline: fetch → normalize → persist → update state.
//!
//! Every attempt, successful or not, writes its outcome back to the feed
//! row, so a feed's error/backoff fields are always current. Errors are
//! contained here; callers only decide how to log them.

pub mod state_machine;

use chrono::Utc;
use tracing::{debug, info};

use crate::app::Result;
use crate::domain::Feed;
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::fetcher::{FetchResult, Fetcher};
use crate::normalizer::Normalizer;
use crate::readability::EnricherHandle;
use crate::store::Store;

use state_machine::{compute_next_fetch, AttemptOutcome};

#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub new_articles: usize,
    pub not_modified: bool,
}

/// Run one refresh attempt for a feed. On success the outcome reports how
/// many articles were new; on failure the error is returned after the
/// failure state has been persisted.
pub async fn refresh_feed<S: Store>(
    store: &S,
    fetcher: &(dyn Fetcher + Send + Sync),
    normalizer: &Normalizer,
    notifier: &ChangeNotifier,
    enricher: Option<&EnricherHandle>,
    feed: &Feed,
) -> Result<RefreshOutcome> {
    let fetched = fetcher
        .fetch(&feed.url, feed.etag.as_deref(), feed.last_modified.as_deref())
        .await;

    let now = Utc::now();

    let (body, etag, last_modified, retry_after) = match fetched {
        Ok(FetchResult::NotModified) => {
            debug!(url = %feed.url, "not modified");
            let patch = compute_next_fetch(feed, AttemptOutcome::NotModified, None, now);
            store.update_feed_state(feed.id, &patch)?;
            return Ok(RefreshOutcome {
                new_articles: 0,
                not_modified: true,
            });
        }
        Ok(FetchResult::Content {
            body,
            etag,
            last_modified,
            retry_after,
        }) => (body, etag, last_modified, retry_after),
        Err(err) => {
            let patch = compute_next_fetch(
                feed,
                AttemptOutcome::Failure(err.to_string()),
                None,
                now,
            );
            store.update_feed_state(feed.id, &patch)?;
            return Err(err);
        }
    };

    let normalized = match normalizer.normalize(feed, &body) {
        Ok(normalized) => normalized,
        Err(err) => {
            // A payload that doesn't parse fails the whole attempt.
            let patch = compute_next_fetch(
                feed,
                AttemptOutcome::Failure(err.to_string()),
                retry_after,
                now,
            );
            store.update_feed_state(feed.id, &patch)?;
            return Err(err);
        }
    };

    // Remember which ids are actually new so enrichment isn't re-queued
    // for re-delivered items on every refresh.
    let mut fresh_ids = Vec::new();
    for article in &normalized.articles {
        if store.get_article(&article.id)?.is_none() {
            fresh_ids.push(article.id.clone());
        }
    }

    let new_articles = store.add_articles(&normalized.articles)?;
    store.update_feed_meta(feed.id, &normalized.meta)?;

    let patch = compute_next_fetch(
        feed,
        AttemptOutcome::Success {
            etag,
            last_modified,
        },
        retry_after,
        now,
    );
    store.update_feed_state(feed.id, &patch)?;

    if let Some(enricher) = enricher {
        let fresh: Vec<_> = normalized
            .articles
            .iter()
            .filter(|a| fresh_ids.contains(&a.id))
            .cloned()
            .collect();
        enricher.queue_articles(fresh).await;

        if feed.icon_path.is_none() {
            if let Some(icon_url) = normalized
                .meta
                .icon_url
                .as_ref()
                .or(feed.icon_url.as_ref())
            {
                enricher.queue_feed_icon(feed.id, icon_url.clone()).await;
            }
        }
    }

    if new_articles > 0 {
        info!(url = %feed.url, new_articles, "ingested");
        notifier.publish(ChangeEvent::ArticlesIngested {
            feed_id: feed.id,
            count: new_articles,
        });
    }
    notifier.publish(ChangeEvent::FeedUpdated(feed.id));

    Ok(RefreshOutcome {
        new_articles,
        not_modified: false,
    })
}
