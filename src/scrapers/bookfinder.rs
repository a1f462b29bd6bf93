use std::sync::Arc;

use tracing::{error, info, warn};
use url::Url;

use crate::config::MarketplaceConfig;
use crate::error::{AppError, FetchError, Result};
use crate::filters::{filter_by_author, filter_by_condition, NameVariants};
use crate::models::ExtractedListing;
use crate::scrapers::browser::ChromeRenderer;
use crate::scrapers::extract::Extractor;
use crate::scrapers::http::{HttpFetcher, RateLimiter};
use crate::scrapers::traits::{PageFetcher, PageRenderer};
use crate::scrapers::types::{SearchMode, SearchQuery};

/// BookFinder marketplace scraper
pub struct BookFinderScraper {
    fetcher: Arc<dyn PageFetcher>,
    renderer: Option<Arc<dyn PageRenderer>>,
    extractor: Extractor,
    base_url: Url,
    currency: String,
    destination: String,
    names: NameVariants,
}

impl BookFinderScraper {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        base_url: Url,
        currency: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            fetcher,
            renderer: None,
            extractor: Extractor::new(base_url.clone())?,
            base_url,
            currency: currency.into(),
            destination: destination.into(),
            names: NameVariants::default(),
        })
    }

    /// Build the HTTP fetcher and, when enabled, the Chrome fallback. Both
    /// share one rate limiter.
    pub fn from_config(config: &MarketplaceConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| AppError::config(format!("marketplace.base_url: {e}")))?;
        let limiter = Arc::new(RateLimiter::new(config.min_interval()));

        let fetcher = HttpFetcher::new(&config.user_agent, config.timeout(), Arc::clone(&limiter))?;
        let mut scraper = Self::new(
            Arc::new(fetcher),
            base_url,
            &config.currency,
            &config.destination,
        )?;

        if config.render_enabled {
            scraper = scraper.with_renderer(Arc::new(ChromeRenderer::new(
                limiter,
                &config.user_agent,
                config.render_timeout(),
            )));
        }
        Ok(scraper)
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_name_variants(mut self, names: NameVariants) -> Self {
        self.names = names;
        self
    }

    /// Run one query through fetch, extraction and the scraper-side filters.
    ///
    /// A fetch failure is returned to the caller; a render failure only
    /// means the fallback found nothing.
    pub async fn search(
        &self,
        query: &SearchQuery,
    ) -> std::result::Result<Vec<ExtractedListing>, FetchError> {
        if let SearchMode::Code { code } = &query.mode {
            if code.is_empty() {
                warn!("Invalid catalog code for {}", query.author);
                return Ok(Vec::new());
            }
        }

        let url = query.url(&self.base_url, &self.currency, &self.destination)?;
        match query.max_price {
            Some(max) => info!("Searching BookFinder for: {} (max price: ${})", query.describe(), max),
            None => info!("Searching BookFinder for: {}", query.describe()),
        }

        let html = self.fetcher.fetch(url.as_str()).await?;
        let author_only = query.is_author_only();

        let found = self.extractor.first_match(&html, author_only);
        let listings = match found {
            Some((strategy, listings)) => {
                info!("Extracted {} listings via {}", listings.len(), strategy);
                listings
            }
            None => self.render_fallback(url.as_str(), author_only).await,
        };

        let listings = filter_by_condition(listings, query.condition);
        let listings = if author_only {
            filter_by_author(listings, &query.author, &self.names)
        } else {
            listings
        };

        info!("Found {} listings for {}", listings.len(), query.describe());
        Ok(listings)
    }

    async fn render_fallback(&self, url: &str, author_only: bool) -> Vec<ExtractedListing> {
        let Some(renderer) = &self.renderer else {
            return Vec::new();
        };

        info!(
            "No listings found with fast methods, trying {}...",
            renderer.backend_name()
        );
        match renderer.render(url).await {
            Ok(rendered) => match self.extractor.first_match(&rendered, author_only) {
                Some((strategy, listings)) => {
                    info!(
                        "Extracted {} listings via {} (rendered)",
                        listings.len(),
                        strategy
                    );
                    listings
                }
                None => Vec::new(),
            },
            Err(e) => {
                warn!("Render fallback failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Check that the marketplace answers at all.
    pub async fn test_connection(&self) -> bool {
        match self.fetcher.fetch(self.base_url.as_str()).await {
            Ok(_) => {
                info!("BookFinder connection test successful");
                true
            }
            Err(e) => {
                error!("BookFinder connection test failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::SearchSpec;

    struct MockFetcher {
        body: Option<String>,
        requests: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        fn serving(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: Some(body.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                body: None,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            match &self.body {
                Some(body) => Ok(body.clone()),
                None => Err(FetchError::Status {
                    status: 503,
                    url: url.to_string(),
                }),
            }
        }
    }

    struct MockRenderer {
        body: Option<String>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl PageRenderer for MockRenderer {
        async fn render(&self, _url: &str) -> std::result::Result<String, FetchError> {
            *self.calls.lock().unwrap() += 1;
            self.body
                .clone()
                .ok_or_else(|| FetchError::Render("chrome crashed".into()))
        }

        fn backend_name(&self) -> &'static str {
            "mock"
        }
    }

    const JSON_PAGE: &str = r#"<script id="__NEXT_DATA__">
        {"props":{"pageProps":{"listings":[
            {"seller":"A","price":45,"condition":"Used"},
            {"seller":"B","price":30,"condition":"New"}
        ]}}}</script>"#;

    const AUTHOR_PAGE: &str = r#"
        <div data-csa-c-item-type="search-offer" data-csa-c-affiliate="one"
             data-csa-c-usdprice="20" data-csa-c-title="Il vitello d'oro"
             data-csa-c-authors="Ciambelli, Bernardo"></div>
        <div data-csa-c-item-type="search-offer" data-csa-c-affiliate="two"
             data-csa-c-usdprice="25" data-csa-c-title="Other Book"
             data-csa-c-authors="Maria Ciambelli"></div>
        <div data-csa-c-item-type="search-offer" data-csa-c-affiliate="three"
             data-csa-c-usdprice="30" data-csa-c-title="Unknown Provenance"></div>"#;

    fn scraper(fetcher: Arc<MockFetcher>) -> BookFinderScraper {
        let base = Url::parse("https://www.bookfinder.com").unwrap();
        BookFinderScraper::new(fetcher, base, "USD", "US").unwrap()
    }

    #[tokio::test]
    async fn search_applies_condition_filter() {
        let fetcher = MockFetcher::serving(JSON_PAGE);
        let scraper = scraper(Arc::clone(&fetcher));

        let spec = SearchSpec {
            title: Some("Invisible Cities".into()),
            ..SearchSpec::new("Italo Calvino")
        };
        let listings = scraper.search(&SearchQuery::from_spec(&spec)).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].seller.as_deref(), Some("A"));

        let requested = fetcher.requests();
        assert_eq!(requested.len(), 1);
        assert!(requested[0].starts_with("https://www.bookfinder.com/search/?author=Calvino"));

        let accept_new = SearchSpec {
            accept_new: true,
            ..spec
        };
        let listings = scraper
            .search(&SearchQuery::from_spec(&accept_new))
            .await
            .unwrap();
        assert_eq!(listings.len(), 2);
    }

    #[tokio::test]
    async fn author_only_search_verifies_identity() {
        let scraper = scraper(MockFetcher::serving(AUTHOR_PAGE));
        let spec = SearchSpec::new("Bernardino Ciambelli");

        let listings = scraper.search(&SearchQuery::from_spec(&spec)).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].title.as_deref(), Some("Il vitello d'oro"));
    }

    #[tokio::test]
    async fn empty_code_skips_fetch() {
        let fetcher = MockFetcher::serving(JSON_PAGE);
        let scraper = scraper(Arc::clone(&fetcher));
        let spec = SearchSpec {
            code: Some("n/a".into()),
            ..SearchSpec::new("Italo Calvino")
        };

        let listings = scraper.search(&SearchQuery::from_spec(&spec)).await.unwrap();
        assert!(listings.is_empty());
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_rendered_page() {
        let renderer = Arc::new(MockRenderer {
            body: Some(JSON_PAGE.to_string()),
            calls: Mutex::new(0),
        });
        let scraper = scraper(MockFetcher::serving("<html><body>loading...</body></html>"))
            .with_renderer(renderer.clone());

        let spec = SearchSpec {
            accept_new: true,
            ..SearchSpec::new("Italo Calvino")
        };
        let spec = SearchSpec {
            title: Some("Invisible Cities".into()),
            ..spec
        };
        let listings = scraper.search(&SearchQuery::from_spec(&spec)).await.unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(*renderer.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn render_failure_means_no_listings() {
        let renderer = Arc::new(MockRenderer {
            body: None,
            calls: Mutex::new(0),
        });
        let scraper = scraper(MockFetcher::serving("<html></html>")).with_renderer(renderer);

        let listings = scraper
            .search(&SearchQuery::from_spec(&SearchSpec::new("Italo Calvino")))
            .await
            .unwrap();
        assert!(listings.is_empty());
    }

    #[tokio::test]
    async fn renderer_not_used_when_static_page_has_listings() {
        let renderer = Arc::new(MockRenderer {
            body: None,
            calls: Mutex::new(0),
        });
        let scraper = scraper(MockFetcher::serving(JSON_PAGE)).with_renderer(renderer.clone());

        let spec = SearchSpec {
            code: Some("9780156453806".into()),
            ..SearchSpec::new("Italo Calvino")
        };
        scraper.search(&SearchQuery::from_spec(&spec)).await.unwrap();
        assert_eq!(*renderer.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn fetch_error_is_returned() {
        let scraper = scraper(MockFetcher::failing());
        let err = scraper
            .search(&SearchQuery::from_spec(&SearchSpec::new("Italo Calvino")))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn connection_test_reports_outcome() {
        assert!(scraper(MockFetcher::serving("ok")).test_connection().await);
        assert!(!scraper(MockFetcher::failing()).test_connection().await);
    }
}
