use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{AppError, FetchError, Result};
use crate::scrapers::traits::PageFetcher;

/// Process-wide pacing of marketplace requests.
///
/// Holds the time of the last request; [`acquire`](Self::acquire) waits out
/// whatever remains of the minimum interval before letting the next one go.
/// One instance is shared by every fetch path.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        // Held across the sleep so concurrent callers queue up behind it.
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limiting: sleeping {:.1}s", wait.as_secs_f64());
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Plain HTTP fetch with a fixed browser-like client identity.
pub struct HttpFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration, limiter: Arc<RateLimiter>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(AppError::Http)?;

        Ok(Self { client, limiter })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        self.limiter.acquire().await;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_request_is_not_delayed() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_out_the_remaining_interval() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        limiter.acquire().await;

        tokio::time::advance(Duration::from_secs(4)).await;
        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(6));
        assert!(waited < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_once_interval_has_passed() {
        let limiter = RateLimiter::new(Duration::from_secs(2));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(3)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_paces_all_holders() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(5)));
        let other = Arc::clone(&limiter);

        let start = Instant::now();
        limiter.acquire().await;
        other.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn builds_client() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
        assert!(HttpFetcher::new("bookwatch-test", Duration::from_secs(5), limiter).is_ok());
    }
}
