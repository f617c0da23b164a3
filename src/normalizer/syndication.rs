use chrono::Utc;
use feed_rs::model::{Entry, Link, MediaObject};
use feed_rs::parser;

use crate::app::{EstuaryError, Result};
use crate::domain::{Article, Enclosure, Feed, FeedMetaPatch};
use crate::normalizer::enrich;
use crate::normalizer::NormalizedFeed;

/// Parse an RSS/Atom/JSON-feed payload into the canonical shape.
///
/// `with_enclosure` folds media attachments (RSS enclosures and Media RSS
/// content) into the article for audio and video sources.
pub fn parse(feed: &Feed, body: &[u8], with_enclosure: bool) -> Result<NormalizedFeed> {
    let parsed = parser::parse(body).map_err(|e| EstuaryError::FeedParse(e.to_string()))?;

    let site_url = parsed
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| parsed.links.first())
        .map(|l| l.href.clone());

    let meta = FeedMetaPatch {
        title: parsed.title.map(|t| enrich::decode(&t.content)),
        site_url,
        icon_url: parsed
            .icon
            .or(parsed.logo)
            .map(|image| image.uri),
    };

    let articles = parsed
        .entries
        .into_iter()
        .filter_map(|entry| map_entry(feed, entry, with_enclosure))
        .collect();

    Ok(NormalizedFeed { meta, articles })
}

fn map_entry(feed: &Feed, entry: Entry, with_enclosure: bool) -> Option<Article> {
    let link = entry.links.first().map(|l| l.href.clone());

    // The guid falls back to the item URL; an entry with neither cannot be
    // de-duplicated and is dropped.
    let guid = if entry.id.is_empty() {
        link.clone()?
    } else {
        entry.id.clone()
    };

    let media_thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .next();

    let enclosure = with_enclosure
        .then(|| {
            enclosure_from_links(&entry.links).or_else(|| enclosure_from_media(&entry.media))
        })
        .flatten();

    let mut article = Article::new(feed.id, &feed.url, &guid);
    article.title = entry.title.map(|t| enrich::decode(&t.content));
    article.url = link;
    article.author = entry.authors.first().map(|a| a.name.clone());
    article.summary = entry.summary.map(|s| enrich::decode(&s.content));
    article.content = entry.content.and_then(|c| c.body).map(|b| enrich::decode(&b));
    article.published_at = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.with_timezone(&Utc));
    article.enclosure = enclosure;

    article.thumbnail_url = enrich::hero_image(
        media_thumbnail.as_deref(),
        article.content.as_deref().or(article.summary.as_deref()),
    );

    Some(article)
}

fn enclosure_from_links(links: &[Link]) -> Option<Enclosure> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("enclosure"))
        .map(|l| Enclosure {
            url: l.href.clone(),
            content_type: l.media_type.clone(),
            length: l.length.map(|n| n as i64),
            duration_secs: None,
        })
}

fn enclosure_from_media(media_objects: &[MediaObject]) -> Option<Enclosure> {
    for media in media_objects {
        let duration = media
            .duration
            .or_else(|| media.content.iter().find_map(|c| c.duration))
            .map(|d| d.as_secs() as i64);

        if let Some(content) = media.content.iter().find(|c| c.url.is_some()) {
            return Some(Enclosure {
                url: content.url.as_ref()?.to_string(),
                content_type: content.content_type.as_ref().map(|t| t.to_string()),
                length: content.size.map(|n| n as i64),
                duration_secs: duration,
            });
        }
    }
    None
}
