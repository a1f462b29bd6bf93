//! Digest delivery.
//!
//! The monitor only depends on [`Notifier`]'s boolean outcome: listings are
//! marked notified after a successful send and left alone otherwise.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

use crate::config::EmailConfig;
use crate::error::{AppError, Result};
use crate::models::DigestListing;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one digest. `true` only if the whole batch went out.
    async fn send_digest(&self, listings: &[DigestListing]) -> bool;
}

/// Rendered digest content
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub subject: String,
    pub text: String,
    pub html: String,
}

type BookGroups<'a> = BTreeMap<&'a str, BTreeMap<&'a str, Vec<&'a DigestListing>>>;

impl Digest {
    /// Render listings grouped by author, then by book, highest price
    /// first. Returns `None` for an empty batch.
    pub fn build(listings: &[DigestListing], date: NaiveDate) -> Option<Self> {
        if listings.is_empty() {
            return None;
        }

        let mut grouped: BookGroups = BTreeMap::new();
        for listing in listings {
            grouped
                .entry(listing.author.as_str())
                .or_default()
                .entry(listing.title.as_str())
                .or_default()
                .push(listing);
        }
        for books in grouped.values_mut() {
            for offers in books.values_mut() {
                offers.sort_by(|a, b| {
                    b.price
                        .unwrap_or(0.0)
                        .total_cmp(&a.price.unwrap_or(0.0))
                });
            }
        }

        let total = listings.len();
        let authors = grouped.len();
        let subject = match grouped.keys().next() {
            Some(author) if authors == 1 => format!("📚 {total} Books by {author}"),
            _ => format!("📚 {total} Books Found - {authors} Authors"),
        };
        let date = date.format("%B %d, %Y").to_string();

        Some(Self {
            subject,
            text: render_text(&grouped, &date, total),
            html: render_html(&grouped, &date, total),
        })
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn price_label(price: Option<f64>) -> String {
    price
        .map(|p| format!("${p:.2}"))
        .unwrap_or_else(|| "Price not available".to_string())
}

fn render_text(grouped: &BookGroups, date: &str, total: usize) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "BOOKS DIGEST\n{date}\n");
    let _ = writeln!(
        out,
        "New Listings: {total} by {} author{}",
        grouped.len(),
        plural(grouped.len())
    );
    let _ = writeln!(out, "Sort Order: Highest price first\n");

    for (author, books) in grouped {
        let count: usize = books.values().map(Vec::len).sum();
        let _ = writeln!(out, "{rule}\n{author} ({count} listing{})\n{rule}\n", plural(count));

        for (title, offers) in books {
            let _ = writeln!(out, "{title}\n{} listing{}:\n", offers.len(), plural(offers.len()));
            for (i, offer) in offers.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. {} - {}\n     Condition: {}\n     {}\n",
                    i + 1,
                    offer.seller.as_deref().unwrap_or("Unknown"),
                    price_label(offer.price),
                    offer.condition.as_deref().unwrap_or("Unknown"),
                    offer.url.as_deref().unwrap_or("#"),
                );
            }
            let _ = writeln!(out, "{}", "-".repeat(60));
        }
    }
    out
}

fn render_html(grouped: &BookGroups, date: &str, total: usize) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Books Digest</title></head>\n\
         <body style=\"font-family: sans-serif; max-width: 800px; margin: 0 auto;\">\n",
    );
    let _ = writeln!(out, "<h1>📚 Books Digest</h1>");
    let _ = writeln!(
        out,
        "<p><strong>Date:</strong> {}<br><strong>New Listings:</strong> {total} by {} author{}<br>\
         <strong>Sort Order:</strong> Highest price first</p>",
        escape(date),
        grouped.len(),
        plural(grouped.len())
    );

    for (author, books) in grouped {
        let count: usize = books.values().map(Vec::len).sum();
        let _ = writeln!(
            out,
            "<h2>{} ({count} listing{})</h2>",
            escape(author),
            plural(count)
        );
        for (title, offers) in books {
            let _ = writeln!(out, "<h3>{}</h3>\n<ul>", escape(title));
            for offer in offers {
                let _ = writeln!(
                    out,
                    "<li><strong>{}</strong> {} <em>{}</em> <a href=\"{}\">View Listing</a></li>",
                    escape(offer.seller.as_deref().unwrap_or("Unknown")),
                    escape(&price_label(offer.price)),
                    escape(offer.condition.as_deref().unwrap_or("Unknown")),
                    escape(offer.url.as_deref().unwrap_or("#")),
                );
            }
            let _ = writeln!(out, "</ul>");
        }
    }
    out.push_str("</body></html>\n");
    out
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoEmail<'a> {
    sender: BrevoContact<'a>,
    to: [BrevoContact<'a>; 1],
    subject: &'a str,
    html_content: &'a str,
    text_content: &'a str,
}

#[derive(Serialize)]
struct BrevoContact<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

/// Sends digests through Brevo's transactional email API.
pub struct BrevoNotifier {
    client: Client,
    api_url: String,
    api_key: String,
    sender_email: String,
    sender_name: String,
    recipient_email: String,
}

impl BrevoNotifier {
    pub fn new(config: &EmailConfig, api_key: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::notify("email API key is empty"));
        }

        Ok(Self {
            client: Client::builder().build()?,
            api_url: config.api_url.clone(),
            api_key,
            sender_email: config.sender_email.clone(),
            sender_name: config.sender_name.clone(),
            recipient_email: config.recipient_email.clone(),
        })
    }

    /// Read the API key from the environment variable named in the config.
    pub fn from_env(config: &EmailConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| AppError::notify(format!("{} is not set", config.api_key_env)))?;
        Self::new(config, api_key)
    }

    async fn post(&self, digest: &Digest) -> Result<()> {
        let body = BrevoEmail {
            sender: BrevoContact {
                email: &self.sender_email,
                name: Some(self.sender_name.as_str()).filter(|n| !n.is_empty()),
            },
            to: [BrevoContact {
                email: &self.recipient_email,
                name: None,
            }],
            subject: &digest.subject,
            html_content: &digest.html,
            text_content: &digest.text,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::notify(format!("Brevo returned {status}: {message}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for BrevoNotifier {
    async fn send_digest(&self, listings: &[DigestListing]) -> bool {
        let Some(digest) = Digest::build(listings, Local::now().date_naive()) else {
            info!("No new listings to send");
            return false;
        };

        match self.post(&digest).await {
            Ok(()) => {
                info!("Email sent to {}: {}", self.recipient_email, digest.subject);
                true
            }
            Err(e) => {
                error!("Error sending email via Brevo: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn listing(author: &str, title: &str, seller: &str, price: Option<f64>) -> DigestListing {
        DigestListing {
            listing_hash: format!("{author}-{title}-{seller}"),
            book_id: format!("{author}-{title}"),
            title: title.to_string(),
            author: author.to_string(),
            code: None,
            year: None,
            seller: Some(seller.to_string()),
            price,
            currency: "USD".to_string(),
            condition: Some("Used".to_string()),
            url: Some(format!("https://example.com/{seller}")),
            first_seen: Utc::now(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn empty_batch_has_no_digest() {
        assert!(Digest::build(&[], date()).is_none());
    }

    #[test]
    fn single_author_subject() {
        let listings = vec![
            listing("Italo Calvino", "Invisible Cities", "A", Some(45.0)),
            listing("Italo Calvino", "Cosmicomics", "B", Some(20.0)),
        ];
        let digest = Digest::build(&listings, date()).unwrap();
        assert_eq!(digest.subject, "📚 2 Books by Italo Calvino");
        assert!(digest.text.contains("March 14, 2026"));
    }

    #[test]
    fn multi_author_subject() {
        let listings = vec![
            listing("Italo Calvino", "Invisible Cities", "A", Some(45.0)),
            listing("Umberto Eco", "Baudolino", "B", Some(20.0)),
            listing("Umberto Eco", "Baudolino", "C", Some(25.0)),
        ];
        let digest = Digest::build(&listings, date()).unwrap();
        assert_eq!(digest.subject, "📚 3 Books Found - 2 Authors");
    }

    #[test]
    fn offers_sorted_by_price_descending() {
        let listings = vec![
            listing("Umberto Eco", "Baudolino", "Cheap", Some(10.0)),
            listing("Umberto Eco", "Baudolino", "Unpriced", None),
            listing("Umberto Eco", "Baudolino", "Dear", Some(90.0)),
        ];
        let text = Digest::build(&listings, date()).unwrap().text;
        let dear = text.find("Dear").unwrap();
        let cheap = text.find("Cheap").unwrap();
        let unpriced = text.find("Unpriced").unwrap();
        assert!(dear < cheap && cheap < unpriced);
        assert!(text.contains("Price not available"));
    }

    #[test]
    fn html_escapes_content() {
        let listings = vec![listing("A & B", "<Title>", "S", Some(1.0))];
        let html = Digest::build(&listings, date()).unwrap().html;
        assert!(html.contains("A &amp; B"));
        assert!(html.contains("&lt;Title&gt;"));
        assert!(!html.contains("<Title>"));
    }

    #[test]
    fn brevo_payload_shape() {
        let body = BrevoEmail {
            sender: BrevoContact {
                email: "bot@example.com",
                name: Some("Book Monitor"),
            },
            to: [BrevoContact {
                email: "me@example.com",
                name: None,
            }],
            subject: "s",
            html_content: "<p>h</p>",
            text_content: "t",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["sender"]["name"], "Book Monitor");
        assert_eq!(value["to"][0]["email"], "me@example.com");
        assert!(value["to"][0].get("name").is_none());
        assert_eq!(value["htmlContent"], "<p>h</p>");
        assert_eq!(value["textContent"], "t");
    }

    #[test]
    fn notifier_requires_key_and_addresses() {
        let mut config = EmailConfig {
            sender_email: "bot@example.com".into(),
            recipient_email: "me@example.com".into(),
            ..Default::default()
        };
        assert!(BrevoNotifier::new(&config, "").is_err());
        assert!(BrevoNotifier::new(&config, "key").is_ok());

        config.recipient_email.clear();
        assert!(BrevoNotifier::new(&config, "key").is_err());
    }
}
