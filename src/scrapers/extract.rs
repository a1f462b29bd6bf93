//! Listing extraction from marketplace pages.
//!
//! Two strategies work on a page body: the embedded `__NEXT_DATA__` payload
//! and the static offer markup. They are tried in [`Strategy::ORDER`] and the
//! first non-empty result wins. The rendered-page fallback reuses both on the
//! browser's DOM snapshot.

use std::fmt;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ExtractedListing, DEFAULT_CURRENCY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Listings array inside the page's embedded JSON payload
    EmbeddedJson,
    /// Offer containers in the HTML itself
    StaticMarkup,
}

impl Strategy {
    pub const ORDER: [Strategy; 2] = [Strategy::EmbeddedJson, Strategy::StaticMarkup];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::EmbeddedJson => "embedded-json",
            Strategy::StaticMarkup => "static-markup",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a single entry was skipped. Never escapes this module.
#[derive(Debug, Error)]
enum EntryError {
    #[error("entry is not an object")]
    NotAnObject,

    #[error("unparseable price: {0}")]
    BadPrice(String),

    #[error("unresolvable link {href}: {source}")]
    BadLink {
        href: String,
        #[source]
        source: url::ParseError,
    },
}

const OFFER_MARKER: &str = "search-offer";

struct MarkupSelectors {
    next_data: Selector,
    no_results: Selector,
    offer: Selector,
    legacy_containers: Vec<Selector>,
    clickout: Selector,
    seller: Vec<Selector>,
    price: Vec<Selector>,
    condition: Vec<Selector>,
    link: Selector,
}

impl MarkupSelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            next_data: parse_selector("script#__NEXT_DATA__")?,
            no_results: parse_selector("div.no-results")?,
            offer: parse_selector(r#"[data-csa-c-item-type="search-offer"]"#)?,
            legacy_containers: parse_selectors(&["div.result-item", "div.bf-book", "tr.result-row"])?,
            clickout: parse_selector(r#"a[data-csa-c-action="clickout"]"#)?,
            seller: parse_selectors(&["span.seller-name", "a.seller", "div.seller"])?,
            price: parse_selectors(&["span.price", "div.price"])?,
            condition: parse_selectors(&["span.condition", "div.condition"])?,
            link: parse_selector("a[href]")?,
        })
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::validation(format!("bad selector {css}: {e:?}")))
}

fn parse_selectors(css: &[&str]) -> Result<Vec<Selector>> {
    css.iter().map(|c| parse_selector(c)).collect()
}

/// Turns page bodies into [`ExtractedListing`]s.
pub struct Extractor {
    selectors: MarkupSelectors,
    price_pattern: Regex,
    condition_pattern: Regex,
    base_url: Url,
}

impl Extractor {
    /// `base_url` resolves relative listing links.
    pub fn new(base_url: Url) -> Result<Self> {
        Ok(Self {
            selectors: MarkupSelectors::new()?,
            price_pattern: Regex::new(r"\$[\d,]+\.?\d*")
                .map_err(|e| AppError::validation(e.to_string()))?,
            condition_pattern: Regex::new(r"(?i)\b(Very Good|New|Used|Fine|Good|Fair|Poor)\b")
                .map_err(|e| AppError::validation(e.to_string()))?,
            base_url,
        })
    }

    /// Try each strategy in order and return the first non-empty result.
    pub fn first_match(
        &self,
        html: &str,
        author_only: bool,
    ) -> Option<(Strategy, Vec<ExtractedListing>)> {
        Strategy::ORDER.into_iter().find_map(|strategy| {
            let listings = self.extract(strategy, html, author_only);
            if listings.is_empty() {
                debug!("Strategy {} found nothing", strategy);
                None
            } else {
                Some((strategy, listings))
            }
        })
    }

    pub fn extract(&self, strategy: Strategy, html: &str, author_only: bool) -> Vec<ExtractedListing> {
        match strategy {
            Strategy::EmbeddedJson => self.extract_embedded_json(html),
            Strategy::StaticMarkup => self.extract_markup(html, author_only),
        }
    }

    fn extract_embedded_json(&self, html: &str) -> Vec<ExtractedListing> {
        let document = Html::parse_document(html);
        let Some(script) = document.select(&self.selectors.next_data).next() else {
            return Vec::new();
        };

        let payload: String = script.text().collect();
        let data: Value = match serde_json::from_str(&payload) {
            Ok(data) => data,
            Err(e) => {
                debug!("Could not parse embedded JSON: {}", e);
                return Vec::new();
            }
        };

        let Some(entries) = data
            .pointer("/props/pageProps/listings")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        let mut listings = Vec::new();
        for entry in entries {
            match self.parse_json_entry(entry) {
                Ok(listing) if listing.has_seller_or_price() => listings.push(listing),
                Ok(_) => {}
                Err(e) => warn!("Skipping listing from embedded JSON: {}", e),
            }
        }
        listings
    }

    fn parse_json_entry(&self, entry: &Value) -> std::result::Result<ExtractedListing, EntryError> {
        let item = entry.as_object().ok_or(EntryError::NotAnObject)?;

        let seller = match item.get("seller") {
            Some(Value::Object(seller)) => seller.get("name").and_then(json_string),
            Some(other) => json_string(other),
            None => None,
        };

        let (price, currency) = match item.get("price") {
            Some(Value::Object(price)) => (
                price.get("amount").map(json_price).transpose()?.flatten(),
                price.get("currency").and_then(json_string),
            ),
            Some(other) => (json_price(other)?, item.get("currency").and_then(json_string)),
            None => (None, item.get("currency").and_then(json_string)),
        };

        let url = ["url", "link", "href"]
            .iter()
            .find_map(|key| item.get(*key).and_then(json_string));

        let listing_authors = match item.get("authors").or_else(|| item.get("author")) {
            Some(Value::Array(names)) => {
                let names: Vec<String> = names.iter().filter_map(json_string).collect();
                (!names.is_empty()).then(|| names.join("; "))
            }
            Some(other) => json_string(other),
            None => None,
        };

        Ok(ExtractedListing {
            seller,
            price,
            currency: currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            condition: item.get("condition").and_then(json_string),
            url,
            title: item.get("title").and_then(json_string),
            listing_authors,
        })
    }

    fn extract_markup(&self, html: &str, author_only: bool) -> Vec<ExtractedListing> {
        let document = Html::parse_document(html);
        if document.select(&self.selectors.no_results).next().is_some() {
            debug!("Page reports no results");
            return Vec::new();
        }

        let mut containers: Vec<ElementRef> = document.select(&self.selectors.offer).collect();
        if containers.is_empty() {
            containers = self
                .selectors
                .legacy_containers
                .iter()
                .map(|selector| document.select(selector).collect::<Vec<_>>())
                .find(|found| !found.is_empty())
                .unwrap_or_default();
        }
        debug!("Found {} potential listing containers", containers.len());

        let mut listings = Vec::new();
        for container in containers {
            let parsed = if container.value().attr("data-csa-c-item-type") == Some(OFFER_MARKER) {
                self.parse_offer(container)
            } else {
                self.parse_legacy(container)
            };

            match parsed {
                Ok(listing) => {
                    if !listing.has_seller_or_price() {
                        continue;
                    }
                    // Author-only results must say which book they are.
                    if author_only && listing.title.is_none() {
                        continue;
                    }
                    debug!(
                        "Parsed listing: {} - ${}",
                        listing.seller.as_deref().unwrap_or("Unknown"),
                        listing
                            .price
                            .map(|p| format!("{p:.2}"))
                            .unwrap_or_else(|| "N/A".to_string())
                    );
                    listings.push(listing);
                }
                Err(e) => warn!("Skipping listing element: {}", e),
            }
        }
        listings
    }

    fn parse_offer(&self, element: ElementRef) -> std::result::Result<ExtractedListing, EntryError> {
        let attr = |name: &str| {
            element
                .value()
                .attr(name)
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let price = attr("data-csa-c-usdprice").and_then(|raw| match raw.parse::<f64>() {
            Ok(price) => Some(price),
            Err(_) => {
                debug!("Ignoring unparseable price attribute: {}", raw);
                None
            }
        });

        let url = element
            .select(&self.selectors.clickout)
            .next()
            .and_then(|link| link.value().attr("href"))
            .map(|href| self.resolve(href))
            .transpose()?;

        Ok(ExtractedListing {
            seller: attr("data-csa-c-affiliate").map(normalize_seller),
            price,
            currency: DEFAULT_CURRENCY.to_string(),
            condition: attr("data-csa-c-condition").map(title_case),
            url,
            title: attr("data-csa-c-title").map(str::to_string),
            listing_authors: attr("data-csa-c-authors").map(str::to_string),
        })
    }

    fn parse_legacy(&self, element: ElementRef) -> std::result::Result<ExtractedListing, EntryError> {
        let seller = first_text(element, &self.selectors.seller);

        let price_text = first_text(element, &self.selectors.price).or_else(|| {
            element
                .text()
                .find_map(|text| self.price_pattern.find(text))
                .map(|m| m.as_str().to_string())
        });
        let price = match price_text {
            Some(text) => Some(parse_price(&text).ok_or(EntryError::BadPrice(text))?),
            None => None,
        };

        let condition = first_text(element, &self.selectors.condition).or_else(|| {
            element
                .text()
                .find_map(|text| self.condition_pattern.find(text))
                .map(|m| m.as_str().to_string())
        });

        let url = element
            .select(&self.selectors.link)
            .next()
            .and_then(|link| link.value().attr("href"))
            .map(|href| self.resolve(href))
            .transpose()?;

        Ok(ExtractedListing {
            seller,
            price,
            currency: DEFAULT_CURRENCY.to_string(),
            condition,
            url,
            title: None,
            listing_authors: None,
        })
    }

    fn resolve(&self, href: &str) -> std::result::Result<String, EntryError> {
        self.base_url
            .join(href.trim())
            .map(String::from)
            .map_err(|source| EntryError::BadLink {
                href: href.to_string(),
                source,
            })
    }
}

fn first_text(element: ElementRef, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        element
            .select(selector)
            .next()
            .map(|found| found.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
    })
}

fn json_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn json_price(value: &Value) -> std::result::Result<Option<f64>, EntryError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => parse_price(s).map(Some).ok_or_else(|| EntryError::BadPrice(s.clone())),
        other => Err(EntryError::BadPrice(other.to_string())),
    }
}

/// Parse a price out of display text such as `"$1,234.50"` or `"12.99 USD"`.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok()
}

/// Affiliate ids come as `abe_books`; shown as `Abe Books`.
fn normalize_seller(raw: &str) -> String {
    title_case(&raw.replace('_', " "))
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}
