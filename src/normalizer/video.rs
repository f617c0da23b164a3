use scraper::{Html, Selector};
use tracing::debug;

use crate::app::{EstuaryError, Result};
use crate::fetcher::Fetcher;

const CHANNEL_FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml?channel_id=";
const PLAYLIST_FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml?playlist_id=";

/// Channel ids are "UC" followed by 22 URL-safe base64 characters.
const CHANNEL_ID_LEN: usize = 24;

/// Resolve an arbitrary channel/handle/playlist URL to its syndication
/// feed URL. Strategies in priority order: a channel id embedded in the
/// URL itself, a scrape of the channel page's canonical id, an explicit
/// playlist id.
pub async fn resolve_feed_url<F: Fetcher + ?Sized>(fetcher: &F, url: &str) -> Result<String> {
    if url.contains("/feeds/videos.xml") {
        return Ok(url.to_string());
    }

    if let Some(channel_id) = channel_id_from_url(url) {
        return Ok(format!("{CHANNEL_FEED_BASE}{channel_id}"));
    }

    match fetcher.fetch_page(url).await {
        Ok(html) => {
            if let Some(channel_id) = channel_id_from_html(&html) {
                return Ok(format!("{CHANNEL_FEED_BASE}{channel_id}"));
            }
        }
        Err(err) => debug!(url, error = %err, "channel page scrape failed"),
    }

    if let Some(playlist_id) = playlist_id_from_url(url) {
        return Ok(format!("{PLAYLIST_FEED_BASE}{playlist_id}"));
    }

    Err(EstuaryError::ChannelResolution(url.to_string()))
}

/// Extract a channel id directly embedded in the URL path.
pub fn channel_id_from_url(url: &str) -> Option<String> {
    let start = url.find("/channel/")? + "/channel/".len();
    extract_channel_id(&url[start..])
}

/// Extract a channel id from a channel page: the canonical link or the
/// Open Graph URL both carry the `/channel/UC...` form.
pub fn channel_id_from_html(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let canonical = Selector::parse("link[rel=\"canonical\"]").ok()?;
    if let Some(href) = document
        .select(&canonical)
        .find_map(|el| el.value().attr("href"))
    {
        if let Some(id) = channel_id_from_url(href) {
            return Some(id);
        }
    }

    let og_url = Selector::parse("meta[property=\"og:url\"]").ok()?;
    document
        .select(&og_url)
        .find_map(|el| el.value().attr("content"))
        .and_then(channel_id_from_url)
}

/// Extract an explicit playlist id from a `list=` query parameter.
pub fn playlist_id_from_url(url: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("list="))
        .filter(|id| !id.is_empty() && id.chars().all(is_id_char))
        .map(String::from)
}

fn extract_channel_id(rest: &str) -> Option<String> {
    let id: String = rest.chars().take_while(|c| is_id_char(*c)).collect();
    (id.len() == CHANNEL_ID_LEN && id.starts_with("UC")).then_some(id)
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL_ID: &str = "UC_x5XG1OV2P6uZZ5FSM9Ttw";

    #[test]
    fn channel_id_from_plain_channel_url() {
        let url = format!("https://www.youtube.com/channel/{CHANNEL_ID}");
        assert_eq!(channel_id_from_url(&url), Some(CHANNEL_ID.into()));
    }

    #[test]
    fn channel_id_survives_trailing_path() {
        let url = format!("https://www.youtube.com/channel/{CHANNEL_ID}/videos?view=0");
        assert_eq!(channel_id_from_url(&url), Some(CHANNEL_ID.into()));
    }

    #[test]
    fn handle_url_has_no_embedded_id() {
        assert_eq!(channel_id_from_url("https://www.youtube.com/@somehandle"), None);
    }

    #[test]
    fn malformed_channel_id_is_rejected() {
        assert_eq!(
            channel_id_from_url("https://www.youtube.com/channel/UCshort"),
            None
        );
    }

    #[test]
    fn channel_id_from_canonical_link() {
        let html = format!(
            r#"<html><head><link rel="canonical" href="https://www.youtube.com/channel/{CHANNEL_ID}"></head></html>"#
        );
        assert_eq!(channel_id_from_html(&html), Some(CHANNEL_ID.into()));
    }

    #[test]
    fn channel_id_from_og_url_meta() {
        let html = format!(
            r#"<html><head><meta property="og:url" content="https://www.youtube.com/channel/{CHANNEL_ID}"></head></html>"#
        );
        assert_eq!(channel_id_from_html(&html), Some(CHANNEL_ID.into()));
    }

    #[test]
    fn playlist_id_from_query() {
        assert_eq!(
            playlist_id_from_url("https://www.youtube.com/playlist?list=PL123abc"),
            Some("PL123abc".into())
        );
        assert_eq!(
            playlist_id_from_url("https://www.youtube.com/watch?v=abc&list=PLxyz"),
            Some("PLxyz".into())
        );
        assert_eq!(playlist_id_from_url("https://www.youtube.com/@handle"), None);
    }
}
