pub mod bookfinder;
pub mod browser;
pub mod extract;
pub mod http;
pub mod traits;
pub mod types;

pub use bookfinder::BookFinderScraper;
pub use traits::{PageFetcher, PageRenderer};
pub use types::SearchQuery;
