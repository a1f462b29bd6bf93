use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity;

/// Default currency when a marketplace entry does not state one
pub const DEFAULT_CURRENCY: &str = "USD";

/// A recurring query definition, as supplied by the spec sheet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchSpec {
    pub author: String,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub keywords: Option<String>,
    /// Catalog code (ISBN-like), enables the direct lookup mode
    pub code: Option<String>,
    pub max_price: Option<f64>,
    #[serde(default)]
    pub accept_new: bool,
}

impl SearchSpec {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            title: None,
            year: None,
            keywords: None,
            code: None,
            max_price: None,
            accept_new: false,
        }
    }

    pub fn id(&self) -> String {
        identity::spec_id(&self.author, self.title.as_deref())
    }

    /// Human-readable summary used in log lines
    pub fn describe(&self) -> String {
        let mut desc = self.author.clone();
        if let Some(title) = &self.title {
            desc.push_str(&format!(" - {title}"));
        }
        if let Some(year) = self.year {
            desc.push_str(&format!(" ({year})"));
        }
        if let Some(keywords) = &self.keywords {
            desc.push_str(&format!(" [{keywords}]"));
        }
        if let Some(code) = &self.code {
            desc.push_str(&format!(" [code: {code}]"));
        }
        if let Some(max_price) = self.max_price {
            desc.push_str(&format!(" [max: ${max_price}]"));
        }
        desc
    }
}

/// A spec as persisted, with its id and check bookkeeping
#[derive(Debug, Clone)]
pub struct StoredSpec {
    pub spec_id: String,
    pub spec: SearchSpec,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Canonical work a listing belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub code: Option<String>,
    pub year: Option<i32>,
}

/// One offer as pulled off a marketplace page, before identity is assigned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedListing {
    pub seller: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub condition: Option<String>,
    pub url: Option<String>,
    /// Book title, present for author-only searches
    pub title: Option<String>,
    /// Author string as the marketplace reports it, used for identity checks
    pub listing_authors: Option<String>,
}

impl ExtractedListing {
    /// Minimum content for an entry to count as a listing
    pub fn has_seller_or_price(&self) -> bool {
        self.seller.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.price.is_some_and(|p| p > 0.0)
    }

    pub fn is_new_condition(&self) -> bool {
        self.condition
            .as_deref()
            .is_some_and(|c| c.trim().eq_ignore_ascii_case("new"))
    }
}

/// A listing ready to persist under its owning book
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRecord {
    pub book_id: String,
    pub seller: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub condition: Option<String>,
    pub url: Option<String>,
}

impl ListingRecord {
    pub fn from_extracted(book_id: impl Into<String>, listing: &ExtractedListing) -> Self {
        Self {
            book_id: book_id.into(),
            seller: listing.seller.clone(),
            price: listing.price,
            currency: listing.currency.clone(),
            condition: listing.condition.clone(),
            url: listing.url.clone(),
        }
    }

    pub fn listing_hash(&self) -> String {
        identity::listing_hash(
            &self.book_id,
            self.seller.as_deref(),
            self.price,
            self.condition.as_deref(),
            self.url.as_deref(),
        )
    }
}

/// A stored listing row
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub listing_hash: String,
    pub book_id: String,
    pub seller: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub condition: Option<String>,
    pub url: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub notified: bool,
}

/// An unnotified listing joined with its book, as handed to the notifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestListing {
    pub listing_hash: String,
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub code: Option<String>,
    pub year: Option<i32>,
    pub seller: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub condition: Option<String>,
    pub url: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_books: usize,
    pub active_listings: usize,
    pub unnotified_listings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_includes_optional_fields() {
        let spec = SearchSpec {
            title: Some("Invisible Cities".into()),
            year: Some(1972),
            max_price: Some(50.0),
            ..SearchSpec::new("Italo Calvino")
        };
        assert_eq!(
            spec.describe(),
            "Italo Calvino - Invisible Cities (1972) [max: $50]"
        );
    }

    #[test]
    fn minimum_fields() {
        let mut listing = ExtractedListing::default();
        assert!(!listing.has_seller_or_price());
        listing.price = Some(0.0);
        assert!(!listing.has_seller_or_price());
        listing.seller = Some("Powell's".into());
        assert!(listing.has_seller_or_price());
    }

    #[test]
    fn record_hash_ignores_currency() {
        let extracted = ExtractedListing {
            seller: Some("A".into()),
            price: Some(12.0),
            currency: "USD".into(),
            ..Default::default()
        };
        let a = ListingRecord::from_extracted("book", &extracted);
        let mut b = a.clone();
        b.currency = "EUR".into();
        assert_eq!(a.listing_hash(), b.listing_hash());
    }
}
