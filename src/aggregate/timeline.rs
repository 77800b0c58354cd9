use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;

use crate::feed::FeedSource;
use crate::storage::Entry;

/// An entry as handed to the renderer: the cached entry plus the owning
/// feed's display name and forwarded metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageEntry {
    #[serde(flatten)]
    pub entry: Entry,
    pub feed_name: String,
    pub feed_metadata: BTreeMap<String, String>,
}

/// One slice of the merged timeline. Page 1 holds the most recent entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub page_number: usize,
    pub entries: Vec<PageEntry>,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Page {
    fn empty() -> Self {
        Self {
            page_number: 1,
            entries: Vec::new(),
            has_next: false,
            has_prev: false,
        }
    }
}

/// Timeline order: newest `published_at` first, undated entries last, ties
/// broken by `(feed_uri, entry_id)` ascending.
pub(crate) fn timeline_order(a: &Entry, b: &Entry) -> Ordering {
    b.published_at
        .cmp(&a.published_at)
        .then_with(|| a.feed_uri.cmp(&b.feed_uri))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

/// Sort and deduplicate a candidate set into the global timeline.
///
/// Entries are unique per `(feed_uri, entry_id)`. Copies of one story in
/// different feeds are kept unless `collapse_cross_feed` is set, in which
/// case entries sharing a non-empty link keep only the first in timeline
/// order.
pub(crate) fn merge(mut entries: Vec<Entry>, collapse_cross_feed: bool) -> Vec<Entry> {
    entries.sort_by(timeline_order);

    let mut seen_keys: HashSet<(String, String)> = HashSet::with_capacity(entries.len());
    let mut seen_links: HashSet<String> = HashSet::new();

    entries.retain(|entry| {
        if !seen_keys.insert((entry.feed_uri.clone(), entry.entry_id.clone())) {
            return false;
        }
        if collapse_cross_feed {
            if let Some(link) = entry.link.as_deref().filter(|l| !l.trim().is_empty()) {
                return seen_links.insert(link.to_string());
            }
        }
        true
    });

    entries
}

/// Slice a merged timeline into pages of `per_page` entries.
///
/// The last page may be short. An empty timeline still yields one empty
/// page so the renderer always has an index to write.
pub(crate) fn paginate(
    timeline: Vec<Entry>,
    per_page: NonZeroUsize,
    sources: &HashMap<&str, &FeedSource>,
) -> Vec<Page> {
    if timeline.is_empty() {
        return vec![Page::empty()];
    }

    let per_page = per_page.get();
    let total_pages = timeline.len().div_ceil(per_page);
    let mut pages: Vec<Page> = Vec::with_capacity(total_pages);
    let mut entries = timeline.into_iter().peekable();

    while entries.peek().is_some() {
        let page_number = pages.len() + 1;
        let page_entries: Vec<PageEntry> = entries
            .by_ref()
            .take(per_page)
            .map(|entry| {
                let source = sources.get(entry.feed_uri.as_str());
                PageEntry {
                    feed_name: source
                        .map(|s| s.display_name.clone())
                        .unwrap_or_else(|| entry.feed_uri.clone()),
                    feed_metadata: source.map(|s| s.metadata.clone()).unwrap_or_default(),
                    entry,
                }
            })
            .collect();

        pages.push(Page {
            page_number,
            entries: page_entries,
            has_next: page_number < total_pages,
            has_prev: page_number > 1,
        });
    }

    pages
}
