//! Run orchestration: sync specs, check each one, send the digest.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::Result;
use crate::filters::filter_by_price;
use crate::identity;
use crate::models::{ExtractedListing, ListingRecord, SearchSpec, StoredSpec};
use crate::notify::Notifier;
use crate::scrapers::types::SearchMode;
use crate::scrapers::{BookFinderScraper, SearchQuery};
use crate::specs::SpecSheetLoader;
use crate::storage::Store;

/// Which phases a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub sync: bool,
    pub sync_only: bool,
    pub notify: bool,
    pub max_specs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sync: true,
            sync_only: false,
            notify: true,
            max_specs: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub synced: usize,
    pub checked: usize,
    pub new_listings: usize,
    pub digest_sent: bool,
}

/// Listings found for one book during a check, before persistence
struct BookGroup {
    title: String,
    listings: Vec<ExtractedListing>,
}

pub struct Monitor {
    scraper: BookFinderScraper,
    store: Store,
}

impl Monitor {
    pub fn new(scraper: BookFinderScraper, store: Store) -> Self {
        Self { scraper, store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run(
        &self,
        options: &RunOptions,
        sheet: &SpecSheetLoader,
        notifier: Option<&dyn Notifier>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if options.sync {
            info!("PHASE 1: SYNC SEARCH SPECIFICATIONS");
            let specs = sheet.load()?;
            summary.synced = self.sync_search_specs(&specs)?;
            if options.sync_only {
                info!("Sync-only mode: exiting");
                return Ok(summary);
            }
        }

        info!("PHASE 2: CHECK SEARCH SPECIFICATIONS");
        let (checked, new_listings) = self.check_all(options.max_specs).await?;
        summary.checked = checked;
        summary.new_listings = new_listings;
        info!("Total new listings found: {}", new_listings);

        // Sends the whole stored backlog, including batches a previous run
        // failed to deliver.
        match notifier {
            _ if !options.notify => info!("Skipping email (disabled)"),
            None => info!("Skipping email (no notifier configured)"),
            Some(notifier) => {
                info!("PHASE 3: SEND DIGEST EMAIL");
                summary.digest_sent = self.send_digest(notifier).await?;
            }
        }

        Ok(summary)
    }

    pub fn sync_search_specs(&self, specs: &[SearchSpec]) -> Result<usize> {
        for spec in specs {
            self.store.upsert_search_spec(spec)?;
        }
        info!("Synced {} search specifications to database", specs.len());
        Ok(specs.len())
    }

    /// Check up to `max_specs` enabled specs in order. Returns how many were
    /// checked and the number of new listings.
    pub async fn check_all(&self, max_specs: usize) -> Result<(usize, usize)> {
        let specs = self.store.get_enabled_search_specs()?;
        let batch: Vec<_> = specs.into_iter().take(max_specs).collect();
        info!("Checking {} search specifications...", batch.len());

        let mut total_new = 0;
        for (i, stored) in batch.iter().enumerate() {
            info!("[{}/{}] {}", i + 1, batch.len(), stored.spec.describe());
            total_new += self.check_search_spec(stored).await?;
        }
        Ok((batch.len(), total_new))
    }

    /// Search, filter and persist listings for one spec; returns the number
    /// of listings seen for the first time. The spec is marked checked on
    /// every path, including fetch failure.
    pub async fn check_search_spec(&self, stored: &StoredSpec) -> Result<usize> {
        let spec = &stored.spec;
        let query = SearchQuery::from_spec(spec);
        info!(
            "Checking listings for: {} (mode: {}, condition: {})",
            spec.describe(),
            query.mode.name(),
            query.condition
        );

        let listings = match self.scraper.search(&query).await {
            Ok(listings) => listings,
            Err(e) => {
                warn!("Search failed for {}: {}", spec.describe(), e);
                Vec::new()
            }
        };

        let found = listings.len();
        let listings = filter_by_price(listings, spec.max_price);
        if listings.len() < found {
            if let Some(max) = spec.max_price {
                info!(
                    "Filtered {} listings above max price ${}",
                    found - listings.len(),
                    max
                );
            }
        }

        if listings.is_empty() {
            info!("No {} listings found for {}", query.condition, spec.describe());
            self.store.mark_checked(&stored.spec_id)?;
            return Ok(0);
        }

        let code = match &query.mode {
            SearchMode::Code { code } => Some(code.as_str()),
            _ => None,
        };
        let groups = group_by_book(listings, spec, code);

        let mut new_listings = 0;
        for (provisional_id, group) in &groups {
            let book_id = self
                .store
                .upsert_book(&group.title, &spec.author, code, spec.year)?;
            if &book_id != provisional_id {
                info!(
                    "Re-keying {} listings from {} to {}",
                    group.listings.len(),
                    provisional_id,
                    book_id
                );
            }

            let records: Vec<ListingRecord> = group
                .listings
                .iter()
                .map(|listing| ListingRecord::from_extracted(book_id.as_str(), listing))
                .collect();
            new_listings += self.store.save_listings(&records)?;
        }

        self.store.mark_checked(&stored.spec_id)?;
        info!(
            "Found {} books, {} new listings for: {}",
            groups.len(),
            new_listings,
            spec.describe()
        );
        Ok(new_listings)
    }

    /// Send every unnotified listing as one digest and mark exactly that
    /// batch notified if delivery succeeded.
    pub async fn send_digest(&self, notifier: &dyn Notifier) -> Result<bool> {
        let by_author = self.store.get_unnotified_by_author()?;
        if by_author.is_empty() {
            info!("No new listings to notify");
            return Ok(false);
        }

        let authors = by_author.len();
        let batch: Vec<_> = by_author.into_values().flatten().collect();
        info!(
            "Preparing digest: {} authors, {} listings",
            authors,
            batch.len()
        );

        if !notifier.send_digest(&batch).await {
            warn!("Failed to send digest; listings stay unnotified");
            return Ok(false);
        }

        let hashes: Vec<String> = batch.into_iter().map(|l| l.listing_hash).collect();
        self.store.mark_notified(&hashes)?;
        Ok(true)
    }
}

/// Group listings under a provisional book key. Code searches use the code
/// itself; other modes use the title+author id.
fn group_by_book(
    listings: Vec<ExtractedListing>,
    spec: &SearchSpec,
    code: Option<&str>,
) -> BTreeMap<String, BookGroup> {
    let mut groups: BTreeMap<String, BookGroup> = BTreeMap::new();
    for listing in listings {
        let title = listing
            .title
            .clone()
            .or_else(|| spec.title.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        let key = match code {
            Some(code) => code.to_string(),
            None => identity::book_id(&title, &spec.author),
        };

        groups
            .entry(key)
            .or_insert_with(|| BookGroup {
                title,
                listings: Vec::new(),
            })
            .listings
            .push(listing);
    }
    groups
}
