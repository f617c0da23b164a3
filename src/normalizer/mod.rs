pub mod enrich;
pub mod syndication;
pub mod video;

use crate::app::Result;
use crate::domain::{Article, Feed, FeedKind, FeedMetaPatch};

/// Canonical output of normalizing one fetched payload.
#[derive(Debug)]
pub struct NormalizedFeed {
    pub meta: FeedMetaPatch,
    pub articles: Vec<Article>,
}

#[derive(Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw payload into the canonical shape. All source kinds are
    /// syndication documents; the kind selects which media fields are
    /// folded into the enclosure. A parse failure fails the whole attempt;
    /// zero entries is a valid empty result.
    pub fn normalize(&self, feed: &Feed, body: &[u8]) -> Result<NormalizedFeed> {
        match feed.kind {
            FeedKind::Web | FeedKind::Forum => syndication::parse(feed, body, false),
            FeedKind::Video | FeedKind::Audio => syndication::parse(feed, body, true),
        }
    }
}
