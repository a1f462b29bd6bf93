//! SQLite persistence for specs, books and listings.
//!
//! Every public operation commits on its own; there are no transactions
//! spanning calls.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::Result;
use crate::identity;
use crate::models::{
    Book, DigestListing, Listing, ListingRecord, SearchSpec, StoreStats, StoredSpec,
};

/// Shown for listings whose book has no author recorded
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS search_specs (
        spec_id TEXT PRIMARY KEY,
        author TEXT NOT NULL,
        title TEXT,
        publication_year INTEGER,
        keywords TEXT,
        code TEXT,
        max_price REAL,
        accept_new INTEGER NOT NULL DEFAULT 0,
        added_date TEXT NOT NULL,
        last_checked TEXT,
        check_enabled INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS books (
        book_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        author TEXT,
        code TEXT,
        publication_year INTEGER,
        added_date TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS listings (
        listing_hash TEXT PRIMARY KEY,
        book_id TEXT NOT NULL,
        seller TEXT,
        price REAL,
        currency TEXT NOT NULL DEFAULT 'USD',
        condition TEXT,
        url TEXT,
        first_seen TEXT NOT NULL,
        last_seen TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        notified INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (book_id) REFERENCES books(book_id)
    );

    CREATE INDEX IF NOT EXISTS idx_books_code ON books(code);
    CREATE INDEX IF NOT EXISTS idx_listings_book_id ON listings(book_id);
    CREATE INDEX IF NOT EXISTS idx_listings_active ON listings(is_active);
    CREATE INDEX IF NOT EXISTS idx_listings_notified ON listings(notified);
";

const DIGEST_QUERY: &str = "
    SELECT l.listing_hash, l.book_id, b.title, b.author, b.code, b.publication_year,
           l.seller, l.price, l.currency, l.condition, l.url, l.first_seen
    FROM listings l
    JOIN books b ON l.book_id = b.book_id
    WHERE l.notified = 0 AND l.is_active = 1
    ORDER BY b.author, l.price DESC
";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file, creating its directory if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let store = Self::with_connection(Connection::open(path)?)?;
        info!("Connected to database: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        debug!("Database schema initialized");
        Ok(())
    }

    /// Insert or refresh a spec, keyed by its author+title id.
    pub fn upsert_search_spec(&self, spec: &SearchSpec) -> Result<String> {
        let spec_id = spec.id();
        self.conn.execute(
            "INSERT INTO search_specs
                (spec_id, author, title, publication_year, keywords, code, max_price, accept_new, added_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(spec_id) DO UPDATE SET
                author = excluded.author,
                title = excluded.title,
                publication_year = excluded.publication_year,
                keywords = excluded.keywords,
                code = excluded.code,
                max_price = excluded.max_price,
                accept_new = excluded.accept_new",
            params![
                spec_id,
                spec.author,
                spec.title,
                spec.year,
                spec.keywords,
                spec.code,
                spec.max_price,
                spec.accept_new,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!("Upserted search spec: {} - {}", spec_id, spec.describe());
        Ok(spec_id)
    }

    pub fn get_enabled_search_specs(&self) -> Result<Vec<StoredSpec>> {
        let mut stmt = self.conn.prepare(
            "SELECT spec_id, author, title, publication_year, keywords, code, max_price,
                    accept_new, last_checked
             FROM search_specs
             WHERE check_enabled = 1
             ORDER BY author, title",
        )?;

        let specs = stmt
            .query_map([], |row| {
                Ok(StoredSpec {
                    spec_id: row.get(0)?,
                    spec: SearchSpec {
                        author: row.get(1)?,
                        title: row.get(2)?,
                        year: row.get(3)?,
                        keywords: row.get(4)?,
                        code: row.get(5)?,
                        max_price: row.get(6)?,
                        accept_new: row.get(7)?,
                    },
                    last_checked: optional_timestamp(row, 8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(specs)
    }

    pub fn mark_checked(&self, spec_id: &str) -> Result<()> {
        self.mark_checked_at(spec_id, Utc::now())
    }

    pub fn mark_checked_at(&self, spec_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE search_specs SET last_checked = ?1 WHERE spec_id = ?2",
            params![at.to_rfc3339(), spec_id],
        )?;
        Ok(())
    }

    /// Insert or update a book and return its canonical id.
    ///
    /// A known code is kept when a later upsert arrives without one.
    pub fn upsert_book(
        &self,
        title: &str,
        author: &str,
        code: Option<&str>,
        year: Option<i32>,
    ) -> Result<String> {
        let book_id = identity::book_id(title, author);
        self.conn.execute(
            "INSERT INTO books (book_id, title, author, code, publication_year, added_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(book_id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                code = COALESCE(excluded.code, books.code),
                publication_year = COALESCE(excluded.publication_year, books.publication_year)",
            params![book_id, title, author, code, year, Utc::now().to_rfc3339()],
        )?;
        debug!("Upserted book: {} - {}", book_id, title);
        Ok(book_id)
    }

    pub fn get_book(&self, book_id: &str) -> Result<Option<Book>> {
        let book = self
            .conn
            .query_row(
                "SELECT book_id, title, author, code, publication_year FROM books WHERE book_id = ?1",
                params![book_id],
                |row| {
                    Ok(Book {
                        book_id: row.get(0)?,
                        title: row.get(1)?,
                        author: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        code: row.get(3)?,
                        year: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(book)
    }

    /// Persist listings and return how many were seen for the first time.
    pub fn save_listings(&self, records: &[ListingRecord]) -> Result<usize> {
        self.save_listings_at(records, Utc::now())
    }

    /// Like [`save_listings`](Self::save_listings) with an explicit clock.
    /// A hash already on file only gets its `last_seen` refreshed.
    pub fn save_listings_at(&self, records: &[ListingRecord], now: DateTime<Utc>) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now.to_rfc3339();
        let mut new_count = 0;

        {
            let mut insert = tx.prepare(
                "INSERT INTO listings
                    (listing_hash, book_id, seller, price, currency, condition, url, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            )?;
            let mut touch = tx.prepare(
                "UPDATE listings SET last_seen = ?1, is_active = 1 WHERE listing_hash = ?2",
            )?;

            for record in records {
                let hash = record.listing_hash();
                let inserted = insert.execute(params![
                    hash,
                    record.book_id,
                    record.seller,
                    record.price,
                    record.currency,
                    record.condition,
                    record.url,
                    now,
                ]);

                match inserted {
                    Ok(_) => {
                        new_count += 1;
                        debug!(
                            "New listing: {} - ${}",
                            record.seller.as_deref().unwrap_or("Unknown"),
                            record.price.map(|p| format!("{p:.2}")).unwrap_or_else(|| "N/A".into())
                        );
                    }
                    Err(e) if is_duplicate_key(&e) => {
                        touch.execute(params![now, hash])?;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tx.commit()?;
        Ok(new_count)
    }

    pub fn get_listing(&self, listing_hash: &str) -> Result<Option<Listing>> {
        let listing = self
            .conn
            .query_row(
                "SELECT listing_hash, book_id, seller, price, currency, condition, url,
                        first_seen, last_seen, is_active, notified
                 FROM listings WHERE listing_hash = ?1",
                params![listing_hash],
                |row| {
                    Ok(Listing {
                        listing_hash: row.get(0)?,
                        book_id: row.get(1)?,
                        seller: row.get(2)?,
                        price: row.get(3)?,
                        currency: row.get(4)?,
                        condition: row.get(5)?,
                        url: row.get(6)?,
                        first_seen: timestamp(row, 7)?,
                        last_seen: timestamp(row, 8)?,
                        is_active: row.get(9)?,
                        notified: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(listing)
    }

    /// Active listings not yet notified, joined with their book, ordered by
    /// author then price descending.
    pub fn get_unnotified(&self) -> Result<Vec<DigestListing>> {
        let mut stmt = self.conn.prepare(DIGEST_QUERY)?;
        let listings = stmt
            .query_map([], |row| {
                let author = row
                    .get::<_, Option<String>>(3)?
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
                Ok(DigestListing {
                    listing_hash: row.get(0)?,
                    book_id: row.get(1)?,
                    title: row.get(2)?,
                    author,
                    code: row.get(4)?,
                    year: row.get(5)?,
                    seller: row.get(6)?,
                    price: row.get(7)?,
                    currency: row.get(8)?,
                    condition: row.get(9)?,
                    url: row.get(10)?,
                    first_seen: timestamp(row, 11)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(listings)
    }

    pub fn get_unnotified_by_author(&self) -> Result<BTreeMap<String, Vec<DigestListing>>> {
        let mut grouped: BTreeMap<String, Vec<DigestListing>> = BTreeMap::new();
        for listing in self.get_unnotified()? {
            grouped.entry(listing.author.clone()).or_default().push(listing);
        }
        Ok(grouped)
    }

    /// Flag exactly these hashes as notified.
    pub fn mark_notified(&self, hashes: &[String]) -> Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; hashes.len()].join(", ");
        let sql = format!("UPDATE listings SET notified = 1 WHERE listing_hash IN ({placeholders})");
        let updated = self.conn.execute(&sql, params_from_iter(hashes.iter()))?;
        info!("Marked {} listings as notified", updated);
        Ok(updated)
    }

    pub fn get_statistics(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        };

        Ok(StoreStats {
            total_books: count("SELECT COUNT(*) FROM books")?,
            active_listings: count("SELECT COUNT(*) FROM listings WHERE is_active = 1")?,
            unnotified_listings: count(
                "SELECT COUNT(*) FROM listings WHERE notified = 0 AND is_active = 1",
            )?,
        })
    }
}

/// Primary-key clash on insert. Foreign-key failures are real errors.
fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && e.extended_code != ffi::SQLITE_CONSTRAINT_FOREIGNKEY
        }
        _ => false,
    }
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_timestamp(idx, &raw)).transpose()
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
