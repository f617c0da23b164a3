use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::app::Result;
use crate::fetcher::{FetchResult, Fetcher, RetryPolicy};

/// Statuses worth retrying before giving up on an attempt.
const RETRYABLE_STATUS: [StatusCode; 6] = [
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub retry: RetryPolicy,
    pub feed_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            feed_timeout_secs: 10,
            page_timeout_secs: 5,
            pool_max_idle_per_host: 4,
            pool_idle_timeout_secs: 90,
        }
    }
}

pub struct HttpFetcher {
    client: Client,
    page_timeout: Duration,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &TransportConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.feed_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("estuary/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            page_timeout: Duration::from_secs(config.page_timeout_secs),
            retry: config.retry,
        }
    }

    /// Issue a GET, retrying retryable statuses and transient transport
    /// errors up to the policy's retry count. The last failure propagates.
    async fn get_with_retries(&self, url: &str, headers: HeaderMap) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            let outcome = self
                .client
                .get(url)
                .headers(headers.clone())
                .send()
                .await;

            match outcome {
                Ok(response) if !RETRYABLE_STATUS.contains(&response.status()) => {
                    return Ok(response);
                }
                Ok(response) if attempt >= self.retry.retries => {
                    response.error_for_status_ref()?;
                    return Ok(response);
                }
                Ok(response) => {
                    debug!(url, status = %response.status(), attempt, "retrying fetch");
                }
                Err(err) if attempt >= self.retry.retries || !is_transient(&err) => {
                    return Err(err.into());
                }
                Err(err) => {
                    debug!(url, error = %err, attempt, "retrying fetch");
                }
            }

            tokio::time::sleep(self.retry.delay_for(attempt)).await;
            attempt += 1;
        }
    }
}

/// Connection-level failures worth another attempt.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn header_string(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn retry_after_hint(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<FetchResult> {
        let mut headers = HeaderMap::new();

        if let Some(etag) = etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }

        if let Some(last_modified) = last_modified {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        let response = self.get_with_retries(url, headers).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchResult::NotModified);
        }

        response.error_for_status_ref()?;

        let etag = header_string(&response, "etag");
        let last_modified = header_string(&response, "last-modified");
        let retry_after = retry_after_hint(&response);

        let body = response.bytes().await?.to_vec();

        Ok(FetchResult::Content {
            body,
            etag,
            last_modified,
            retry_after,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(self.page_timeout)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .client
            .get(url)
            .timeout(self.page_timeout)
            .send()
            .await?
            .error_for_status()?;

        let content_type = header_string(&response, "content-type");
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_fetcher() -> HttpFetcher {
        HttpFetcher::new(&TransportConfig {
            retry: RetryPolicy {
                retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            ..TransportConfig::default()
        })
    }

    #[tokio::test]
    async fn fetch_returns_body_and_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"v1\"")
                    .insert_header("last-modified", "Mon, 01 Jan 2024 00:00:00 GMT")
                    .set_body_string("<rss/>"),
            )
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let result = fetcher
            .fetch(&format!("{}/feed", server.uri()), None, None)
            .await
            .unwrap();

        match result {
            FetchResult::Content {
                body,
                etag,
                last_modified,
                ..
            } => {
                assert_eq!(body, b"<rss/>");
                assert_eq!(etag.as_deref(), Some("\"v1\""));
                assert!(last_modified.is_some());
            }
            FetchResult::NotModified => panic!("expected content"),
        }
    }

    #[tokio::test]
    async fn conditional_fetch_reports_not_modified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let result = fetcher
            .fetch(&format!("{}/feed", server.uri()), Some("\"v1\""), None)
            .await
            .unwrap();

        assert!(matches!(result, FetchResult::NotModified));
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let result = fetcher
            .fetch(&format!("{}/flaky", server.uri()), None, None)
            .await
            .unwrap();

        match result {
            FetchResult::Content { body, .. } => assert_eq!(body, b"ok"),
            FetchResult::NotModified => panic!("expected content"),
        }
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let result = fetcher
            .fetch(&format!("{}/down", server.uri()), None, None)
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let result = fetcher
            .fetch(&format!("{}/gone", server.uri()), None, None)
            .await;

        // 404 is terminal: surfaced via error_for_status, single request.
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn retry_after_is_captured_as_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("retry-after", "7200")
                    .set_body_string("<rss/>"),
            )
            .mount(&server)
            .await;

        let fetcher = fast_fetcher();
        let result = fetcher
            .fetch(&format!("{}/feed", server.uri()), None, None)
            .await
            .unwrap();

        match result {
            FetchResult::Content { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7200)));
            }
            FetchResult::NotModified => panic!("expected content"),
        }
    }
}
