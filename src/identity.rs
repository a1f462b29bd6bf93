//! Content-derived identifiers for specs, books and listings.
//!
//! All ids are SHA-256 digests rendered as lowercase hex. Book and spec ids
//! are truncated to [`SHORT_ID_LEN`] characters; listing hashes keep the full
//! digest so that offers for the same book stay distinguishable.

use sha2::{Digest, Sha256};

/// Width of truncated ids (books, search specs).
pub const SHORT_ID_LEN: usize = 16;

const SEPARATOR: &str = "|";

fn digest_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Canonical id of a work, derived from its title and author.
pub fn book_id(title: &str, author: &str) -> String {
    let content = format!("{}{SEPARATOR}{}", normalize(title), normalize(author));
    let mut id = digest_hex(&content);
    id.truncate(SHORT_ID_LEN);
    id
}

/// Identity of a single offer. Any change to seller, price, condition or
/// url produces a different hash.
///
/// Fields are length-prefixed, so separator characters inside a seller or
/// url cannot shift a field boundary. The price uses its shortest exact
/// representation; a missing price is distinct from zero.
pub fn listing_hash(
    book_id: &str,
    seller: Option<&str>,
    price: Option<f64>,
    condition: Option<&str>,
    url: Option<&str>,
) -> String {
    let price = price.map(|p| p.to_string());
    let fields = [Some(book_id), seller, price.as_deref(), condition, url];

    let mut content = String::new();
    for field in fields {
        match field {
            Some(value) => content.push_str(&format!("{}:{value}{SEPARATOR}", value.len())),
            None => content.push_str(&format!("-{SEPARATOR}")),
        }
    }
    digest_hex(&content)
}

/// Id of a recurring search spec. Same author and title map to the same
/// row so re-syncing the sheet updates in place.
pub fn spec_id(author: &str, title: Option<&str>) -> String {
    let content = format!(
        "{}{SEPARATOR}{}",
        normalize(author),
        normalize(title.unwrap_or(""))
    );
    let mut id = digest_hex(&content);
    id.truncate(SHORT_ID_LEN);
    id
}
