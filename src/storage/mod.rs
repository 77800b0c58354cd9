mod entries;
mod records;
mod schema;
mod types;

pub use schema::Cache;
pub use types::{CacheError, CacheRecord, Entry, FeedStatus, FetchOutcome, Validator};
