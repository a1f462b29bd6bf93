use async_trait::async_trait;

use crate::error::FetchError;

/// Plain page fetch, returning the raw response body.
/// Implementations share one rate limiter so every request is paced.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Script-executing fetch, returning the rendered DOM as HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, FetchError>;

    /// Name of the rendering backend, for log lines
    fn backend_name(&self) -> &'static str;
}
