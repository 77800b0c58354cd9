//! Feed retrieval and parsing.
//!
//! - [`source`] - The per-feed descriptor resolved from configuration
//! - [`fetcher`] - Conditional HTTP GET with a hard per-feed timeout
//! - [`parser`] - RSS/Atom parsing into normalised entries using `feed-rs`
//!
//! Neither the fetcher nor the parser touches the cache; the aggregator
//! wires their results into [`crate::storage::Cache::update`].

mod fetcher;
mod parser;
mod source;

pub use fetcher::{FetchError, FetchResponse, Fetcher, MAX_FEED_SIZE};
pub use parser::{parse_feed, ParseError, ParsedEntry, ParsedFeed};
pub use source::FeedSource;
