use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::assets::AssetCache;
use crate::domain::Article;
use crate::fetcher::Fetcher;
use crate::readability;
use crate::store::Store;

/// Message type for the background enricher
#[derive(Debug)]
pub enum EnrichMessage {
    /// Extract full text and cache thumbnails for a batch of articles
    Articles(Vec<Article>),
    /// Download and cache a feed's icon
    FeedIcon { feed_id: i64, url: String },
    /// Shutdown the enricher
    Shutdown,
}

/// Handle to send work to the background enricher
#[derive(Clone)]
pub struct EnricherHandle {
    tx: mpsc::Sender<EnrichMessage>,
}

impl EnricherHandle {
    /// Queue articles for full-text extraction and thumbnail caching
    pub async fn queue_articles(&self, articles: Vec<Article>) {
        if articles.is_empty() {
            return;
        }
        if let Err(e) = self.tx.send(EnrichMessage::Articles(articles)).await {
            warn!("Failed to queue articles for enrichment: {}", e);
        }
    }

    /// Queue a feed icon download
    pub async fn queue_feed_icon(&self, feed_id: i64, url: String) {
        if let Err(e) = self.tx.send(EnrichMessage::FeedIcon { feed_id, url }).await {
            warn!("Failed to queue feed icon: {}", e);
        }
    }

    /// Shutdown the background enricher
    pub async fn shutdown(&self) {
        let _ = self.tx.send(EnrichMessage::Shutdown).await;
    }
}

/// Background service that fills in enrichment fields after ingestion.
///
/// Every failure in here degrades output quality only; nothing is
/// propagated back to the ingestion pipeline.
pub struct BackgroundEnricher<S: Store + Send + Sync + 'static> {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    store: Arc<S>,
    assets: Arc<AssetCache>,
    rx: mpsc::Receiver<EnrichMessage>,
}

impl<S: Store + Send + Sync + 'static> BackgroundEnricher<S> {
    pub fn new(
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        store: Arc<S>,
        assets: Arc<AssetCache>,
    ) -> (Self, EnricherHandle) {
        let (tx, rx) = mpsc::channel(100);
        let handle = EnricherHandle { tx };
        let enricher = Self {
            fetcher,
            store,
            assets,
            rx,
        };
        (enricher, handle)
    }

    pub async fn run(mut self) {
        info!("Background enricher started");

        while let Some(msg) = self.rx.recv().await {
            match msg {
                EnrichMessage::Articles(articles) => {
                    for article in articles {
                        self.enrich_article(article).await;
                    }
                }
                EnrichMessage::FeedIcon { feed_id, url } => {
                    self.cache_feed_icon(feed_id, &url).await;
                }
                EnrichMessage::Shutdown => {
                    info!("Background enricher shutting down");
                    break;
                }
            }
        }
    }

    async fn enrich_article(&self, article: Article) {
        let mut thumbnail = article.thumbnail_url.clone();

        if readability::needs_extraction(&article) {
            // This is the one place the "never blocks ingestion" decision
            // is made: extraction errors end here, as a debug line.
            let url = article.url.clone().unwrap_or_default();
            match self.fetcher.fetch_page(&url).await {
                Ok(html) => match readability::extract(&html) {
                    Some(extraction) => {
                        if let Err(e) = self
                            .store
                            .set_readability_content(&article.id, &extraction.content)
                        {
                            warn!("Failed to store extracted content: {}", e);
                        }
                        if thumbnail.is_none() {
                            thumbnail = extraction.hero_image;
                        }
                    }
                    None => debug!(url, "page yielded no extractable content"),
                },
                Err(e) => debug!(url, error = %e, "content extraction fetch failed"),
            }
        }

        if let Some(thumb_url) = thumbnail {
            if article.thumbnail_path.is_none() {
                self.cache_thumbnail(&article.id, &thumb_url).await;
            }
        }
    }

    async fn cache_thumbnail(&self, article_id: &str, url: &str) {
        match self.fetcher.fetch_bytes(url).await {
            Ok((bytes, content_type)) => {
                match self.assets.store(url, &bytes, content_type.as_deref()) {
                    Ok((path, _)) => {
                        if let Err(e) = self.store.set_article_thumbnail(
                            article_id,
                            url,
                            path.to_str(),
                        ) {
                            warn!("Failed to record thumbnail: {}", e);
                        }
                    }
                    Err(e) => debug!(url, error = %e, "thumbnail not cacheable"),
                }
            }
            Err(e) => debug!(url, error = %e, "thumbnail fetch failed"),
        }
    }

    async fn cache_feed_icon(&self, feed_id: i64, url: &str) {
        match self.fetcher.fetch_bytes(url).await {
            Ok((bytes, content_type)) => {
                match self.assets.store(url, &bytes, content_type.as_deref()) {
                    Ok((path, mime)) => {
                        if let Some(path) = path.to_str() {
                            if let Err(e) =
                                self.store.set_feed_icon_cache(feed_id, url, path, &mime)
                            {
                                warn!("Failed to record feed icon: {}", e);
                            }
                        }
                    }
                    Err(e) => debug!(url, error = %e, "icon not cacheable"),
                }
            }
            Err(e) => debug!(url, error = %e, "icon fetch failed"),
        }
    }
}

/// Spawn the background enricher as a tokio task
pub fn spawn_background_enricher<S: Store + Send + Sync + 'static>(
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    store: Arc<S>,
    assets: Arc<AssetCache>,
) -> EnricherHandle {
    let (enricher, handle) = BackgroundEnricher::new(fetcher, store, assets);

    tokio::spawn(async move {
        enricher.run().await;
    });

    handle
}
