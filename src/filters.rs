//! Result filters applied to extracted listings.
//!
//! Order matters: condition first, then author verification (author-only
//! searches), then the price ceiling once the caller has the listings.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::models::ExtractedListing;
use crate::scrapers::types::ConditionFilter;

/// Drop listings that do not satisfy the condition filter.
pub fn filter_by_condition(
    listings: Vec<ExtractedListing>,
    filter: ConditionFilter,
) -> Vec<ExtractedListing> {
    if filter == ConditionFilter::Any {
        return listings;
    }

    let before = listings.len();
    let kept: Vec<_> = listings
        .into_iter()
        .filter(|listing| match filter {
            ConditionFilter::Used => !listing.is_new_condition(),
            ConditionFilter::New => listing.is_new_condition(),
            ConditionFilter::Any => true,
        })
        .collect();

    debug!(
        "Condition filter: {} -> {} listings (filter={})",
        before,
        kept.len(),
        filter
    );
    kept
}

/// Drop listings above the ceiling. The ceiling is inclusive; a listing
/// without a price cannot be shown to be under it and is dropped.
pub fn filter_by_price(
    listings: Vec<ExtractedListing>,
    max_price: Option<f64>,
) -> Vec<ExtractedListing> {
    let Some(max_price) = max_price else {
        return listings;
    };

    let before = listings.len();
    let kept: Vec<_> = listings
        .into_iter()
        .filter(|listing| listing.price.is_some_and(|price| price <= max_price))
        .collect();

    if kept.len() < before {
        debug!(
            "Price filter: dropped {} listings over ${:.2}",
            before - kept.len(),
            max_price
        );
    }
    kept
}

/// Accepted spellings of given names, keyed by lowercase canonical name.
#[derive(Debug, Clone)]
pub struct NameVariants {
    aliases: HashMap<String, Vec<String>>,
}

impl NameVariants {
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Register extra spellings for a given name.
    pub fn with_alias<I, S>(mut self, canonical: &str, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self
            .aliases
            .entry(canonical.trim().to_lowercase())
            .or_default();
        for variant in variants {
            let variant = variant.into().trim().to_lowercase();
            if !variant.is_empty() && !entry.contains(&variant) {
                entry.push(variant);
            }
        }
        self
    }

    /// The name itself, its initial, then any registered aliases.
    pub fn variants_for(&self, first_name: &str) -> Vec<String> {
        let first_name = first_name.trim().to_lowercase();
        let mut variants = Vec::new();
        let Some(initial) = first_name.chars().next() else {
            return variants;
        };

        variants.push(first_name.clone());
        variants.push(initial.to_string());
        if let Some(aliases) = self.aliases.get(&first_name) {
            for alias in aliases {
                if !variants.contains(alias) {
                    variants.push(alias.clone());
                }
            }
        }
        variants
    }
}

impl Default for NameVariants {
    fn default() -> Self {
        Self::empty()
            .with_alias("andre", ["andrea", "andy", "andrew"])
            .with_alias("bernardino", ["bernardo", "bernard"])
            .with_alias("giuseppe", ["joseph", "joe"])
            .with_alias("antonio", ["anthony", "tony"])
            .with_alias("salvatore", ["sal", "salvator"])
    }
}

/// Checks a listing's author string against the searched author.
///
/// Names are matched on word boundaries, so an initial never matches the
/// inside of another given name and the last name never matches a longer
/// surname.
#[derive(Debug, Clone)]
pub struct AuthorMatcher {
    /// `None` if the pattern failed to compile; nothing matches then.
    pattern: Option<Regex>,
}

impl AuthorMatcher {
    /// Returns `None` for a blank author. A single-word name is treated as a
    /// last name only.
    pub fn new(author: &str, names: &NameVariants) -> Option<Self> {
        let parts: Vec<&str> = author.split_whitespace().collect();
        let last = regex::escape(&parts.last()?.to_lowercase());

        let pattern = if parts.len() > 1 {
            let firsts = names
                .variants_for(parts[0])
                .iter()
                .map(|v| regex::escape(v))
                .collect::<Vec<_>>()
                .join("|");
            // "first last", "f. last", "last, first", "last; first"
            format!(r"\b(?:{firsts})\.?\s+{last}\b|\b{last}\s*[,;]\s*(?:{firsts})\b")
        } else {
            format!(r"\b{last}\b")
        };

        let pattern = Regex::new(&pattern)
            .map_err(|e| warn!("Cannot build author pattern for {}: {}", author, e))
            .ok();
        Some(Self { pattern })
    }

    pub fn matches(&self, listing_authors: &str) -> bool {
        let haystack = listing_authors.to_lowercase();
        match &self.pattern {
            Some(pattern) => pattern.is_match(&haystack),
            None => false,
        }
    }
}

/// Keep only listings whose reported author verifies against `author`.
/// Listings without author data are rejected.
pub fn filter_by_author(
    listings: Vec<ExtractedListing>,
    author: &str,
    names: &NameVariants,
) -> Vec<ExtractedListing> {
    let Some(matcher) = AuthorMatcher::new(author, names) else {
        return listings;
    };

    let before = listings.len();
    let kept: Vec<_> = listings
        .into_iter()
        .filter(|listing| match listing.listing_authors.as_deref() {
            Some(authors) if matcher.matches(authors) => true,
            Some(authors) => {
                debug!("Skipping - wrong author: '{}' (wanted: {})", authors, author);
                false
            }
            None => {
                debug!(
                    "Skipping - no author data for '{}'",
                    listing.title.as_deref().unwrap_or("Unknown")
                );
                false
            }
        })
        .collect();

    debug!(
        "Author filter: {} -> {} listings (author={})",
        before,
        kept.len(),
        author
    );
    kept
}
