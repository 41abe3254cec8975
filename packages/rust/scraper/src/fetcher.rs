//! Paced HTTP GET with retry and exponential backoff.
//!
//! Every outbound request, retries included, waits until at least
//! `request_delay` has passed since the previous one. Timeouts and connection
//! failures are retried with exponential backoff. HTTP 429 waits for the
//! server's `Retry-After`, capped at `rate_limit_max_wait`, before the retry;
//! the last attempt returns without waiting. Any other non-2xx status is
//! returned as-is.

use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

use taxwatch_shared::{FetchConfig, Result, TaxwatchError};

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff: `base * 2^attempt`, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Delay to wait after the `attempt_index`-th failure (0-based).
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&FetchConfig> for BackoffPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            base_delay: config.backoff_base,
            max_delay: config.backoff_max,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after redirects.
    pub url: Url,
    /// Decoded response body.
    pub body: String,
}

/// Rate-limited HTTP client shared by every request of a scrape.
///
/// One `reqwest::Client` (keep-alive pool + cookie jar) is reused across calls.
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    backoff: BackoffPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl Fetcher {
    /// Create a fetcher with the given runtime configuration.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("es-ES,es;q=0.9,en;q=0.8"),
        );

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| TaxwatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            backoff: BackoffPolicy::from(&config),
            config,
            last_request: Mutex::new(None),
        })
    }

    /// GET `url`, retrying transient failures up to `max_attempts` in total.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<FetchedDocument> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.fetch_once(url).await {
                Ok(doc) => return Ok(doc),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            let delay = match &err {
                TaxwatchError::RateLimited { retry_after, .. } => self.rate_limit_wait(*retry_after),
                _ => self.backoff.delay_for_attempt(attempt - 1),
            };
            warn!(attempt, max_attempts, ?delay, error = %err, "fetch failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchedDocument> {
        self.pace().await;
        debug!(%url, "GET");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TaxwatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!(%url, ?retry_after, "rate limited by server");
            return Err(TaxwatchError::RateLimited {
                url: url.to_string(),
                retry_after,
            });
        }

        if !status.is_success() {
            return Err(TaxwatchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| TaxwatchError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(FetchedDocument {
            url: final_url,
            body,
        })
    }

    /// Wait before retrying a 429: the server's `Retry-After` or the
    /// configured default, never more than `rate_limit_max_wait`.
    fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or(self.config.rate_limit_default_wait)
            .min(self.config.rate_limit_max_wait)
    }

    /// Sleep until `request_delay` has elapsed since the previous request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.request_delay {
                tokio::time::sleep(self.config.request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
pub(crate) fn test_fetch_config() -> FetchConfig {
    FetchConfig {
        user_agent: "taxwatch-test".into(),
        timeout: Duration::from_secs(5),
        request_delay: Duration::ZERO,
        max_attempts: 3,
        backoff_base: Duration::ZERO,
        backoff_max: Duration::ZERO,
        rate_limit_default_wait: Duration::ZERO,
        rate_limit_max_wait: Duration::from_millis(50),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{p}", server.uri())).unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hola</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_fetch_config()).unwrap();
        let doc = fetcher.fetch(&url(&server, "/ok")).await.unwrap();
        assert_eq!(doc.body, "<html>hola</html>");
        assert_eq!(doc.url.path(), "/ok");
    }

    #[tokio::test]
    async fn rate_limit_is_retried_after_wait() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("listo"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_fetch_config()).unwrap();
        let doc = fetcher.fetch(&url(&server, "/busy")).await.unwrap();
        assert_eq!(doc.body, "listo");
    }

    #[tokio::test]
    async fn persistent_rate_limit_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_fetch_config()).unwrap();
        let err = fetcher.fetch(&url(&server, "/busy")).await.unwrap_err();
        match err {
            TaxwatchError::RateLimited { retry_after, .. } => assert_eq!(retry_after, None),
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn huge_retry_after_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "4294967295"))
            .expect(2)
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_attempts: 2,
            ..test_fetch_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let start = Instant::now();
        let err = fetcher.fetch(&url(&server, "/busy")).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        match err {
            TaxwatchError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(4294967295)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn final_rate_limit_returns_without_waiting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .expect(1)
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_attempts: 1,
            rate_limit_max_wait: Duration::from_secs(30),
            ..test_fetch_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let start = Instant::now();
        let err = fetcher.fetch(&url(&server, "/busy")).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(err, TaxwatchError::RateLimited { .. }));
    }

    #[test]
    fn rate_limit_wait_falls_back_to_default_then_caps() {
        let config = FetchConfig {
            rate_limit_default_wait: Duration::from_secs(60),
            rate_limit_max_wait: Duration::from_secs(120),
            ..test_fetch_config()
        };
        let fetcher = Fetcher::new(config).unwrap();
        assert_eq!(fetcher.rate_limit_wait(None), Duration::from_secs(60));
        assert_eq!(fetcher.rate_limit_wait(Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(fetcher.rate_limit_wait(Some(Duration::from_secs(900))), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn other_statuses_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(test_fetch_config()).unwrap();
        let err = fetcher.fetch(&url(&server, "/missing")).await.unwrap_err();
        assert!(matches!(err, TaxwatchError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn connection_failure_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let fetcher = Fetcher::new(test_fetch_config()).unwrap();
        let target = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let err = fetcher.fetch(&target).await.unwrap_err();
        assert!(matches!(err, TaxwatchError::Network(_)));
    }

    #[tokio::test]
    async fn requests_are_paced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = FetchConfig {
            request_delay: Duration::from_millis(150),
            ..test_fetch_config()
        };
        let fetcher = Fetcher::new(config).unwrap();

        let start = Instant::now();
        fetcher.fetch(&url(&server, "/a")).await.unwrap();
        fetcher.fetch(&url(&server, "/b")).await.unwrap();
        fetcher.fetch(&url(&server, "/c")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
