use std::path::Path;

use crate::app::{AppContext, EstuaryError, Result};
use crate::domain::{Feed, FeedKind};
use crate::normalizer::video;
use crate::pipeline;
use crate::retention;
use crate::store::Store;
use crate::sync;

/// The CLI operates as the first user; other users exist only through the
/// route layer.
pub const DEFAULT_USER: i64 = 1;

async fn refresh_one(ctx: &AppContext, feed: &Feed) -> Result<pipeline::RefreshOutcome> {
    pipeline::refresh_feed(
        ctx.store.as_ref(),
        ctx.fetcher.as_ref(),
        &ctx.normalizer,
        &ctx.notifier,
        ctx.enricher.as_ref(),
        feed,
    )
    .await
}

fn find_feed(ctx: &AppContext, url: &str) -> Result<Feed> {
    ctx.store
        .get_feed_by_url(DEFAULT_USER, url)?
        .ok_or_else(|| EstuaryError::FeedNotFound(url.to_string()))
}

pub async fn add_feed(
    ctx: &AppContext,
    url: &str,
    kind: &str,
    interval: Option<i64>,
) -> Result<()> {
    let kind = FeedKind::parse(kind)
        .ok_or_else(|| EstuaryError::Other(format!("Unknown feed type: {kind}")))?;

    // Video subscriptions accept any channel/handle/playlist URL and are
    // resolved to the canonical feed URL up front.
    let feed_url = match kind {
        FeedKind::Video => video::resolve_feed_url(ctx.fetcher.as_ref(), url).await?,
        _ => url.to_string(),
    };

    if ctx.store.get_feed_by_url(DEFAULT_USER, &feed_url)?.is_some() {
        println!("Feed already exists: {}", feed_url);
        return Ok(());
    }

    let mut feed = Feed::new(DEFAULT_USER, kind, feed_url.clone());
    if let Some(minutes) = interval {
        feed.refresh_interval_minutes = minutes.max(1);
    }
    let feed_id = ctx.store.add_feed(&feed)?;
    println!("Added {} feed: {}", kind.as_str(), feed_url);

    let feed = ctx.store.get_feed(feed_id)?.unwrap_or(feed);
    match refresh_one(ctx, &feed).await {
        Ok(outcome) => {
            if let Some(stored) = ctx.store.get_feed(feed_id)? {
                if let Some(title) = stored.title {
                    println!("Feed title: {}", title);
                }
            }
            println!("Fetched {} articles", outcome.new_articles);
        }
        Err(e) => eprintln!("Initial fetch failed (will retry on schedule): {}", e),
    }

    Ok(())
}

pub async fn remove_feed(ctx: &AppContext, url: &str) -> Result<()> {
    let feed = find_feed(ctx, url)?;
    ctx.store.soft_delete_feed(feed.id)?;
    ctx.notifier
        .publish(crate::events::ChangeEvent::FeedRemoved(feed.id));
    println!("Removed feed: {}", url);
    Ok(())
}

pub async fn refresh_feeds(ctx: &AppContext, url: Option<&str>) -> Result<()> {
    let feeds = match url {
        // Manual refresh bypasses due-selection entirely, circuit included;
        // a success resets the error count through the state machine.
        Some(url) => vec![find_feed(ctx, url)?],
        None => ctx.store.list_feeds(DEFAULT_USER)?,
    };

    if feeds.is_empty() {
        println!("No feeds to refresh");
        return Ok(());
    }

    println!("Refreshing {} feeds...", feeds.len());
    let mut total_new = 0;
    let mut errors = 0;

    for feed in &feeds {
        match refresh_one(ctx, feed).await {
            Ok(outcome) => {
                total_new += outcome.new_articles;
                if outcome.new_articles > 0 {
                    println!(
                        "  {} new articles from {}",
                        outcome.new_articles,
                        feed.display_title()
                    );
                }
            }
            Err(e) => {
                errors += 1;
                eprintln!("  Error refreshing {}: {}", feed.display_title(), e);
            }
        }
    }

    println!("Refresh complete: {} new articles, {} errors", total_new, errors);
    Ok(())
}

pub fn pause_feed(ctx: &AppContext, url: &str) -> Result<()> {
    let feed = find_feed(ctx, url)?;
    ctx.store.set_feed_paused(feed.id, true)?;
    println!("Paused: {}", feed.display_title());
    Ok(())
}

/// Resume clears both the pause flag and the error circuit.
pub fn resume_feed(ctx: &AppContext, url: &str) -> Result<()> {
    let feed = find_feed(ctx, url)?;
    ctx.store.set_feed_paused(feed.id, false)?;
    ctx.store.reset_feed_errors(feed.id)?;
    println!("Resumed: {}", feed.display_title());
    Ok(())
}

pub fn list_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.store.list_feeds(DEFAULT_USER)?;

    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    for feed in feeds {
        let unread = ctx.store.unread_count(DEFAULT_USER, feed.id)?;
        let status = if feed.is_paused() {
            " [paused]"
        } else if feed.circuit_open() {
            " [failing]"
        } else {
            ""
        };
        println!(
            "{} ({}, {} unread){}\n  {}",
            feed.display_title(),
            feed.kind.as_str(),
            unread,
            status,
            feed.url
        );
        if let Some(ref err) = feed.last_error {
            println!("  last error: {}", err);
        }
    }

    Ok(())
}

pub fn list_articles(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.store.list_feeds(DEFAULT_USER)?;
    let mut any = false;

    for feed in feeds {
        for article in ctx.store.list_articles_by_feed(feed.id)? {
            any = true;
            let state = ctx.store.get_read_state(DEFAULT_USER, &article.id)?;
            let read_marker = if state.map(|s| s.is_read).unwrap_or(false) {
                " "
            } else {
                "*"
            };
            let date = article
                .published_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "          ".to_string());
            println!("{} {} {}", read_marker, date, article.display_title());
        }
    }

    if !any {
        println!("No articles");
    }
    Ok(())
}

pub fn sync_changes(ctx: &AppContext, cursor: Option<&str>, include: &str) -> Result<()> {
    let include = sync::IncludeSet::parse(include);
    let changes = sync::get_changes(ctx.store.as_ref(), DEFAULT_USER, cursor, &include)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&changes)
            .map_err(|e| EstuaryError::Other(e.to_string()))?
    );
    Ok(())
}

pub fn maintenance_stats(ctx: &AppContext) -> Result<()> {
    let stats = ctx.store.stats()?;
    println!("feeds:        {}", stats.feeds);
    println!("articles:     {}", stats.articles);
    println!("folders:      {}", stats.folders);
    println!("read_state:   {}", stats.read_state);
    println!("size:         {} bytes", stats.size_bytes);
    println!(
        "fragmentation: {:.1}% ({} of {} pages free)",
        stats.fragmentation * 100.0,
        stats.freelist_count,
        stats.page_count
    );
    Ok(())
}

pub fn maintenance_optimize(ctx: &AppContext) -> Result<()> {
    let report = ctx.store.optimize()?;
    println!("Optimized in {}ms", report.elapsed_ms);
    Ok(())
}

pub fn maintenance_compact(ctx: &AppContext, force: bool) -> Result<()> {
    let report = ctx.store.compact(force)?;
    println!(
        "Compacted: {} bytes reclaimed in {}ms",
        report.bytes_reclaimed, report.elapsed_ms
    );
    Ok(())
}

pub fn maintenance_purge(ctx: &AppContext, feed_id: i64) -> Result<()> {
    let feed = ctx
        .store
        .get_feed(feed_id)?
        .ok_or_else(|| EstuaryError::FeedNotFound(feed_id.to_string()))?;
    if feed.deleted_at.is_none() {
        return Err(EstuaryError::Other(
            "Feed is not soft-deleted; remove it first".into(),
        ));
    }
    ctx.store.purge_feed(feed_id)?;
    println!("Purged feed {} and its articles", feed_id);
    Ok(())
}

pub fn retention_show(ctx: &AppContext) -> Result<()> {
    let policy = ctx.store.get_retention_policy(DEFAULT_USER)?;
    println!("enabled:      {}", policy.enabled);
    println!(
        "max age:      {}",
        policy
            .max_age_days
            .map(|d| format!("{d} days"))
            .unwrap_or_else(|| "unlimited".into())
    );
    println!(
        "max per feed: {}",
        policy
            .max_per_feed
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".into())
    );
    println!("keep starred: {}", policy.keep_starred);
    println!("keep unread:  {}", policy.keep_unread);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn retention_set(
    ctx: &AppContext,
    enabled: Option<bool>,
    max_age_days: Option<i64>,
    max_per_feed: Option<i64>,
    keep_starred: Option<bool>,
    keep_unread: Option<bool>,
) -> Result<()> {
    let mut policy = ctx.store.get_retention_policy(DEFAULT_USER)?;

    if let Some(enabled) = enabled {
        policy.enabled = enabled;
    }
    if let Some(days) = max_age_days {
        policy.max_age_days = (days > 0).then_some(days);
    }
    if let Some(count) = max_per_feed {
        policy.max_per_feed = (count > 0).then_some(count);
    }
    if let Some(keep) = keep_starred {
        policy.keep_starred = keep;
    }
    if let Some(keep) = keep_unread {
        policy.keep_unread = keep;
    }

    ctx.store.set_retention_policy(&policy)?;
    println!("Policy updated");
    retention_show(ctx)
}

pub fn retention_preview(ctx: &AppContext) -> Result<()> {
    let report = retention::preview(ctx.store.as_ref(), DEFAULT_USER)?;
    println!("Would delete {} articles", report.articles_deleted);
    Ok(())
}

pub fn retention_run(ctx: &AppContext) -> Result<()> {
    let report = retention::enforce(ctx.store.as_ref(), DEFAULT_USER)?;
    println!(
        "Deleted {} articles{}",
        report.articles_deleted,
        if report.compacted {
            format!(", reclaimed {} bytes", report.bytes_reclaimed)
        } else {
            String::new()
        }
    );
    Ok(())
}

/// Import feeds from an OPML file
pub async fn import_opml(ctx: &AppContext, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let feed_urls = parse_opml(&content);

    if feed_urls.is_empty() {
        println!("No feeds found in OPML file");
        return Ok(());
    }

    println!("Found {} feeds in OPML file", feed_urls.len());

    let mut added = 0;
    let mut skipped = 0;
    let mut errors = 0;

    for (title, url) in feed_urls {
        if ctx.store.get_feed_by_url(DEFAULT_USER, &url)?.is_some() {
            skipped += 1;
            continue;
        }

        let mut feed = Feed::new(DEFAULT_USER, FeedKind::Web, url.clone());
        feed.title = Some(title.clone());
        let feed_id = ctx.store.add_feed(&feed)?;
        let feed = ctx.store.get_feed(feed_id)?.unwrap_or(feed);

        match refresh_one(ctx, &feed).await {
            Ok(outcome) => {
                println!("  + {} ({} articles)", title, outcome.new_articles);
                added += 1;
            }
            Err(e) => {
                eprintln!("  ! {} - {}", title, e);
                ctx.store.purge_feed(feed_id)?;
                errors += 1;
            }
        }
    }

    println!(
        "\nImport complete: {} added, {} skipped (already exist), {} errors",
        added, skipped, errors
    );

    Ok(())
}

/// Parse OPML content and extract feed URLs with titles
fn parse_opml(content: &str) -> Vec<(String, String)> {
    let mut feeds = Vec::new();

    for line in content.lines() {
        if line.contains("xmlUrl") {
            if let (Some(title), Some(url)) = (
                extract_attr(line, "title").or_else(|| extract_attr(line, "text")),
                extract_attr(line, "xmlUrl"),
            ) {
                feeds.push((title, url));
            }
        }
    }

    feeds
}

/// Extract an attribute value from an XML element string
fn extract_attr(line: &str, attr: &str) -> Option<String> {
    let pattern = format!("{}=\"", attr);
    let start = line.find(&pattern)? + pattern.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    Some(html_escape::decode_html_entities(&rest[..end]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_opml_extracts_titles_and_urls() {
        let opml = r#"<?xml version="1.0"?>
<opml version="1.0">
  <body>
    <outline title="Rust Blog" text="Rust Blog" xmlUrl="https://blog.rust-lang.org/feed.xml"/>
    <outline text="Other &amp; More" xmlUrl="https://example.com/feed"/>
    <outline title="Folder only"/>
  </body>
</opml>"#;

        let feeds = parse_opml(opml);
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].0, "Rust Blog");
        assert_eq!(feeds[0].1, "https://blog.rust-lang.org/feed.xml");
        assert_eq!(feeds[1].0, "Other & More");
    }
}
