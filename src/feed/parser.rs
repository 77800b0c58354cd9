use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Input is neither RSS nor Atom, or is too broken to recover.
    #[error("Malformed feed: {0}")]
    MalformedFeed(String),
}

/// One item of a parsed feed, before it is attached to a feed URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub entry_id: String,
    pub title: String,
    pub link: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Feed-level metadata plus entries in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub link: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // feed-rs fills missing ids with its own hash (or a random UUID when an
    // item has no link); leave them empty so `generate_entry_id` decides.
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| ParseError::MalformedFeed(e.to_string()))?;

    let title = feed.title.map(|t| t.content);
    let link = feed.links.first().map(|l| l.href.clone());

    let mut entries: Vec<ParsedEntry> = Vec::with_capacity(feed.entries.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for entry in feed.entries {
        let link = entry.links.first().map(|l| l.href.clone());
        let updated_at = entry.updated.map(whole_seconds);
        let published_at = entry.published.map(whole_seconds).or(updated_at);
        let content = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content));
        let author = entry
            .authors
            .into_iter()
            .map(|p| p.name)
            .find(|name| !name.trim().is_empty());
        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let existing_id = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id.as_str())
        };
        let entry_id = generate_entry_id(existing_id, link.as_deref(), &title, published_at);

        let parsed = ParsedEntry {
            entry_id,
            title,
            link,
            author,
            content,
            published_at,
            updated_at,
        };

        // A repeated id within one document replaces the earlier item
        match positions.get(&parsed.entry_id) {
            Some(&idx) => entries[idx] = parsed,
            None => {
                positions.insert(parsed.entry_id.clone(), entries.len());
                entries.push(parsed);
            }
        }
    }

    Ok(ParsedFeed {
        title,
        link,
        entries,
    })
}

/// Stable identifier for an entry.
///
/// A non-blank GUID from the feed is used verbatim. Otherwise the id is the
/// SHA-256 of link, title and the publication *day*, so that a feed which
/// re-stamps the time of an otherwise identical item keeps the same id.
pub(crate) fn generate_entry_id(
    existing: Option<&str>,
    link: Option<&str>,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        link.unwrap_or(""),
        title,
        published
            .map(|p| p.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

fn whole_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.timestamp(), 0).unwrap_or(dt)
}
