use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Media attachment carried by audio and video items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Enclosure {
    pub url: String,
    pub content_type: Option<String>,
    pub length: Option<i64>,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub feed_id: i64,
    /// Natural de-duplication key, unique within the feed. Falls back to
    /// the item URL when the source declares no identifier.
    pub guid: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    /// Full-text extraction filled in asynchronously after insert.
    pub readability_content: Option<String>,
    pub enclosure: Option<Enclosure>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_path: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl Article {
    pub fn new(feed_id: i64, feed_url: &str, guid: &str) -> Self {
        Self {
            id: Self::generate_id(feed_url, guid),
            feed_id,
            guid: guid.to_string(),
            title: None,
            url: None,
            author: None,
            summary: None,
            content: None,
            readability_content: None,
            enclosure: None,
            thumbnail_url: None,
            thumbnail_path: None,
            published_at: None,
            fetched_at: Utc::now(),
        }
    }

    /// Generate a deterministic ID from feed URL and guid.
    pub fn generate_id(feed_url: &str, guid: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(feed_url.as_bytes());
        hasher.update(guid.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }

    /// Best available body for display: extracted full text, then feed
    /// content, then summary.
    pub fn display_content(&self) -> &str {
        self.readability_content
            .as_deref()
            .or(self.content.as_deref())
            .or(self.summary.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generation_deterministic() {
        let a = Article::generate_id("https://example.com/feed.xml", "guid-1");
        let b = Article::generate_id("https://example.com/feed.xml", "guid-1");
        assert_eq!(a, b);
    }

    #[test]
    fn id_generation_distinct_inputs() {
        let a = Article::generate_id("https://example.com/feed.xml", "guid-1");
        let b = Article::generate_id("https://example.com/feed.xml", "guid-2");
        let c = Article::generate_id("https://other.com/feed.xml", "guid-1");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn id_is_hex_sha256() {
        let id = Article::generate_id("https://example.com/feed.xml", "guid-1");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn display_content_prefers_readability() {
        let mut article = Article::new(1, "https://example.com/feed.xml", "g1");
        article.summary = Some("summary".into());
        article.content = Some("feed content".into());
        assert_eq!(article.display_content(), "feed content");
        article.readability_content = Some("full text".into());
        assert_eq!(article.display_content(), "full text");
    }

    #[test]
    fn display_content_empty_when_bodyless() {
        let article = Article::new(1, "https://example.com/feed.xml", "g1");
        assert_eq!(article.display_content(), "");
    }
}
