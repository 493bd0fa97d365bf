//! Retrieving and parsing feed documents.
//!
//! - [`fetcher`] downloads a document over HTTP with retry and size limits
//! - [`parser`] turns RSS/Atom/JSON Feed bytes into [`ParsedItem`](crate::storage::ParsedItem)s
//!
//! Neither touches storage; [`crate::ingest::subscribe`] does that.

mod fetcher;
mod parser;

pub use fetcher::{fetch_feed, FetchError, FetchOptions};
pub use parser::{parse_feed, ParsedFeed};
