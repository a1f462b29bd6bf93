use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::scrapers::http::RateLimiter;
use crate::scrapers::traits::PageRenderer;

/// Any of these showing up means listings have been rendered.
const LISTING_MARKERS: &str =
    r#"[data-csa-c-item-type="search-offer"], div.result-item, div.bf-book, tr.result-row"#;

/// How long to wait for a listing marker before taking the snapshot anyway
const MARKER_WAIT: Duration = Duration::from_secs(15);

/// Extra time for late scripts after the markers appear
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Slack for a blocking step that overruns the deadline before the browser
/// is torn down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Renders pages in headless Chrome and returns the resulting DOM.
/// A fresh browser is launched per page, and every step of a render shares
/// one deadline. `render` returns only after the browser has closed.
pub struct ChromeRenderer {
    limiter: Arc<RateLimiter>,
    user_agent: String,
    timeout: Duration,
}

impl ChromeRenderer {
    pub fn new(limiter: Arc<RateLimiter>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            limiter,
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        self.limiter.acquire().await;
        info!("Rendering page in headless Chrome...");

        let target = url.to_string();
        let user_agent = self.user_agent.clone();
        let deadline = Instant::now() + self.timeout;
        let mut task =
            tokio::task::spawn_blocking(move || render_blocking(&target, &user_agent, deadline));

        // The blocking side stops itself at the deadline; the browser is only
        // closed once it returns, so the task is always awaited.
        let waited = tokio::time::timeout(self.timeout + SHUTDOWN_GRACE, &mut task).await;
        let joined = match waited {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Chrome still busy after {:?}, waiting for it to close", self.timeout);
                task.await
            }
        };

        joined.map_err(|e| FetchError::Render(e.to_string()))?
    }

    fn backend_name(&self) -> &'static str {
        "headless-chrome"
    }
}

/// Time left before `deadline`, or a timeout error once it has passed.
fn remaining(deadline: Instant, url: &str) -> Result<Duration, FetchError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(FetchError::Timeout(url.to_string()))
    } else {
        Ok(left)
    }
}

fn render_blocking(url: &str, user_agent: &str, deadline: Instant) -> Result<String, FetchError> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .window_size(Some((1920, 1080)))
        .idle_browser_timeout(remaining(deadline, url)?)
        .build()
        .map_err(|e| FetchError::Render(format!("launch options: {e}")))?;

    let browser = Browser::new(options).map_err(render_err)?;
    let tab = browser.new_tab().map_err(render_err)?;
    tab.set_default_timeout(remaining(deadline, url)?);
    tab.set_user_agent(user_agent, None, None).map_err(render_err)?;

    debug!("Chrome navigating to: {}", url);
    tab.navigate_to(url).map_err(render_err)?;
    tab.wait_until_navigated().map_err(render_err)?;

    let marker_wait = MARKER_WAIT.min(remaining(deadline, url)?);
    if let Err(e) = tab.wait_for_element_with_custom_timeout(LISTING_MARKERS, marker_wait) {
        debug!("No listing markers appeared, continuing: {}", e);
    }
    thread::sleep(SETTLE_DELAY.min(remaining(deadline, url)?));

    remaining(deadline, url)?;
    let html = tab.get_content().map_err(render_err)?;
    info!("Rendered page captured ({} bytes)", html.len());
    Ok(html)
}

fn render_err(err: impl std::fmt::Display) -> FetchError {
    FetchError::Render(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_budget_shrinks_to_timeout() {
        let url = "https://www.bookfinder.com/search/";
        let ahead = Instant::now() + Duration::from_secs(30);
        let left = remaining(ahead, url).unwrap();
        assert!(left <= Duration::from_secs(30));
        assert!(MARKER_WAIT.min(left) <= left);

        let passed = Instant::now() - Duration::from_millis(1);
        assert!(matches!(remaining(passed, url), Err(FetchError::Timeout(u)) if u == url));
    }
}
