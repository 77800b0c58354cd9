use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::feed::{ParsedEntry, ParsedFeed};

// ============================================================================
// Error Types
// ============================================================================

/// Cache-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum CacheError {
    /// Another planet run holds the cache database
    #[error("Another planet run appears to be using the cache. Wait for it to finish and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Cache migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Cache error: {0}")]
    Other(#[from] sqlx::Error),
}

impl CacheError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return CacheError::InstanceLocked;
        }
        CacheError::Other(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
// one of these messages
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Data Structures
// ============================================================================

/// Conditional-fetch token taken from `ETag` / `Last-Modified` response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validator {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// One item of one feed, as stored in the cache.
///
/// `(feed_uri, entry_id)` is unique. A later fetch replaces every field of an
/// entry with the same id; fields are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub feed_uri: String,
    pub entry_id: String,
    pub title: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn from_parsed(feed_uri: &str, parsed: ParsedEntry) -> Self {
        Self {
            feed_uri: feed_uri.to_string(),
            entry_id: parsed.entry_id,
            title: parsed.title,
            link: parsed.link,
            author: parsed.author,
            content: parsed.content,
            published_at: parsed.published_at,
            updated_at: parsed.updated_at,
        }
    }
}

/// Fetch bookkeeping for one feed, without its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    pub feed_uri: String,
    pub title: Option<String>,
    pub site_link: Option<String>,
    pub last_fetch_attempt: Option<DateTime<Utc>>,
    pub last_fetch_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub validator: Validator,
    pub entry_count: usize,
}

/// Durable per-feed snapshot: last known good entries plus fetch status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub feed_uri: String,
    pub title: Option<String>,
    pub site_link: Option<String>,
    pub entries: BTreeMap<String, Entry>,
    pub last_fetch_attempt: Option<DateTime<Utc>>,
    pub last_fetch_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub validator: Validator,
}

/// What one fetch cycle produced for a feed, as handed to `Cache::update`.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Fresh content was downloaded and parsed.
    Fetched {
        feed: ParsedFeed,
        validator: Validator,
    },
    /// The server confirmed the stored validator is still current.
    NotModified,
    /// Fetch or parse failed; the detail is kept as `last_error`.
    Failed(String),
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for entry queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryDbRow {
    pub feed_uri: String,
    pub entry_id: String,
    pub title: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl EntryDbRow {
    pub(crate) fn into_entry(self) -> Entry {
        Entry {
            feed_uri: self.feed_uri,
            entry_id: self.entry_id,
            title: self.title,
            link: self.link,
            author: self.author,
            content: self.content,
            published_at: self.published_at.and_then(from_unix),
            updated_at: self.updated_at.and_then(from_unix),
        }
    }
}

/// Internal row type for feed status queries
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub uri: String,
    pub title: Option<String>,
    pub site_link: Option<String>,
    pub last_fetch_attempt: Option<i64>,
    pub last_fetch_success: Option<i64>,
    pub last_error: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub entry_count: i64,
}

impl FeedDbRow {
    pub(crate) fn into_status(self) -> FeedStatus {
        FeedStatus {
            feed_uri: self.uri,
            title: self.title,
            site_link: self.site_link,
            last_fetch_attempt: self.last_fetch_attempt.and_then(from_unix),
            last_fetch_success: self.last_fetch_success.and_then(from_unix),
            last_error: self.last_error,
            validator: Validator {
                etag: self.etag,
                last_modified: self.last_modified,
            },
            entry_count: usize::try_from(self.entry_count).unwrap_or(0),
        }
    }
}

pub(crate) fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
