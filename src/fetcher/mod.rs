pub mod http_fetcher;

use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;

pub use http_fetcher::HttpFetcher;

#[derive(Debug)]
pub enum FetchResult {
    /// New content fetched successfully
    Content {
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
        /// Server-provided rescheduling hint (Retry-After), if any.
        retry_after: Option<Duration>,
    },
    /// Content not modified (HTTP 304)
    NotModified,
}

#[async_trait]
pub trait Fetcher {
    /// Fetch a feed document, sending conditional headers when validators
    /// are present. Transient failures are retried internally.
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResult>;

    /// Fetch an HTML page for content enrichment. Uses a shorter timeout
    /// than feed fetches and is never retried.
    async fn fetch_page(&self, url: &str) -> Result<String>;

    /// Fetch a small binary asset (icon, thumbnail) with its content type.
    async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>)>;
}

/// Retry schedule for transient transport failures.
///
/// `delay = min(max_delay, base_delay * 2^attempt)`, scaled by a jitter
/// factor drawn uniformly from [0.8, 1.2].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 300,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);
        let jitter: f64 = rand::Rng::gen_range(&mut rand::thread_rng(), 0.8..=1.2);
        Duration::from_millis((exp as f64 * jitter) as u64)
    }
}
