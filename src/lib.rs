//! Marketplace listing monitor: searches a book marketplace for a sheet of
//! author/title specs, stores what it finds and emails a digest of new
//! listings.

pub mod config;
pub mod error;
pub mod filters;
pub mod identity;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod scrapers;
pub mod specs;
pub mod storage;
