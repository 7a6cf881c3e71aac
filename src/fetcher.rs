//! HTTP access to the origin site with fixed-count retry logic.
//!
//! Every request goes through one [`Fetcher`], which owns the
//! `reqwest::Client` (fixed header set, connect/read timeouts) and a
//! per-process stylesheet cache.
//!
//! # Retry Strategy
//!
//! Sub-resources (stylesheets and images) are fetched with
//! [`Fetcher::fetch_text`] and [`Fetcher::fetch_binary`]:
//!
//! - At most 3 attempts
//! - Network error: short pause (500ms), then retry
//! - HTTP 429: fixed 5 second pause, then retry
//! - Any other non-200 status: retry immediately
//!
//! Exhausted retries yield `None`; callers treat that as "resource
//! unavailable" and carry on.
//!
//! Documents (post pages, the sitemap) use [`Fetcher::fetch_document`]:
//! a single attempt with a longer timeout whose error is reported to the
//! caller.

use reqwest::header::{ACCEPT, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESOURCE_TIMEOUT: Duration = Duration::from_secs(15);
const DOCUMENT_TIMEOUT: Duration = Duration::from_secs(20);

/// How many times, and how patiently, a sub-resource is requested.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Pause after a transport error (timeout, refused connection, ...).
    pub error_pause: Duration,
    /// Pause after an HTTP 429.
    pub rate_limit_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            error_pause: Duration::from_millis(500),
            rate_limit_pause: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the origin site.
///
/// Shared by reference between the article loop and the image workers of
/// one article. The stylesheet cache is keyed by exact URL and only ever
/// gains entries; two workers storing the same URL store the same text.
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
    stylesheets: Mutex<HashMap<String, String>>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Build a fetcher with the browser-like header set and the given policy.
    pub fn new(policy: RetryPolicy) -> Result<Self, Box<dyn Error>> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(RESOURCE_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            policy,
            stylesheets: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch a whole document (post page or sitemap) in a single attempt.
    ///
    /// The body is always decoded as UTF-8, whatever charset the
    /// `Content-Type` header claims. Non-success statuses are reported as
    /// errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_document(&self, url: &str) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .timeout(DOCUMENT_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetch a textual resource, going through the stylesheet cache.
    pub async fn fetch_text(&self, url: &str) -> Option<String> {
        if let Some(hit) = self.cached(url) {
            debug!(%url, "Stylesheet cache hit");
            return Some(hit);
        }

        let text = self.with_retry(url, |resp| resp.text()).await?;
        self.stylesheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), text.clone());
        Some(text)
    }

    /// Fetch a binary resource. Never cached.
    pub async fn fetch_binary(&self, url: &str) -> Option<Vec<u8>> {
        self.with_retry(url, |resp| async move { resp.bytes().await.map(|b| b.to_vec()) })
            .await
    }

    fn cached(&self, url: &str) -> Option<String> {
        self.stylesheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn with_retry<T, F, Fut>(&self, url: &str, read: F) -> Option<T>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, reqwest::Error>>,
    {
        let t0 = Instant::now();

        for attempt in 1..=self.policy.max_attempts {
            let outcome = match self.client.get(url).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => read(resp).await.map(Some),
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt, pause = ?self.policy.rate_limit_pause, "Rate limited; backing off");
                        sleep(self.policy.rate_limit_pause).await;
                    } else {
                        debug!(attempt, %status, "Unexpected status");
                    }
                    Ok(None)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(Some(value)) => {
                    debug!(attempt, elapsed_ms = t0.elapsed().as_millis() as u64, "Fetched resource");
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(attempt, max = self.policy.max_attempts, error = %e, "Request failed; retrying");
                    sleep(self.policy.error_pause).await;
                }
            }
        }

        warn!(
            attempts = self.policy.max_attempts,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Resource unavailable after retries"
        );
        None
    }
}
