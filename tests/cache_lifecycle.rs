//! Integration tests for the cache across runs and process restarts.
//!
//! These drive `Cache::update` directly with parsed feeds, so they need no
//! network. File-backed tests use a temporary directory.

use chrono::{DateTime, TimeZone, Utc};
use planet::aggregate::{AggregateOptions, Aggregator};
use planet::feed::{FeedSource, Fetcher, ParsedEntry, ParsedFeed};
use planet::storage::{Cache, FetchOutcome, Validator};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap()
}

fn entry(id: &str, link: Option<&str>, published: Option<DateTime<Utc>>) -> ParsedEntry {
    ParsedEntry {
        entry_id: id.to_string(),
        title: format!("Post {id}"),
        link: link.map(str::to_string),
        author: None,
        content: Some(format!("<p>{id}</p>")),
        published_at: published,
        updated_at: None,
    }
}

fn fetched(entries: Vec<ParsedEntry>, etag: Option<&str>) -> FetchOutcome {
    FetchOutcome::Fetched {
        feed: ParsedFeed {
            title: Some("Feed".to_string()),
            link: None,
            entries,
        },
        validator: Validator {
            etag: etag.map(str::to_string),
            last_modified: None,
        },
    }
}

fn aggregator(cache: Cache, items_per_page: usize) -> Aggregator {
    Aggregator::new(
        cache,
        Fetcher::new(reqwest::Client::new()),
        AggregateOptions {
            items_per_page,
            ..AggregateOptions::default()
        },
    )
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn test_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("planet.db");
    let path = path.to_str().unwrap();

    let cache = Cache::open(path).await.unwrap();
    cache
        .update(
            "https://a.example.org/feed",
            fetched(
                vec![
                    entry("1", Some("https://a.example.org/1"), Some(at(9))),
                    entry("2", None, None),
                ],
                Some("\"abc\""),
            ),
        )
        .await
        .unwrap();
    let before = cache.get("https://a.example.org/feed").await.unwrap().unwrap();
    cache.close().await;

    let reopened = Cache::open(path).await.unwrap();
    let after = reopened
        .get("https://a.example.org/feed")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(after, before);
    assert_eq!(after.entries.len(), 2);
    assert_eq!(after.validator.etag.as_deref(), Some("\"abc\""));
    assert_eq!(after.entries["1"].published_at, Some(at(9)));
}

#[tokio::test]
async fn test_offline_pages_match_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("planet.db");
    let path = path.to_str().unwrap();
    let sources = vec![FeedSource::new("https://a.example.org/feed", "A")];

    let cache = Cache::open(path).await.unwrap();
    cache
        .update(
            &sources[0].uri,
            fetched(vec![entry("1", None, Some(at(1))), entry("2", None, Some(at(2)))], None),
        )
        .await
        .unwrap();
    let first = aggregator(cache.clone(), 10).build_pages(&sources).await.unwrap();
    cache.close().await;

    let reopened = Cache::open(path).await.unwrap();
    let second = aggregator(reopened, 10).build_pages(&sources).await.unwrap();

    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

// ============================================================================
// Failure Bookkeeping
// ============================================================================

#[tokio::test]
async fn test_failure_then_recovery_bookkeeping() {
    let cache = Cache::open(":memory:").await.unwrap();
    let uri = "https://a.example.org/feed";

    cache
        .update(uri, fetched(vec![entry("1", None, Some(at(1)))], Some("\"v1\"")))
        .await
        .unwrap();
    let good = cache.get(uri).await.unwrap().unwrap();

    cache
        .update(uri, FetchOutcome::Failed("Request timed out after 20s".to_string()))
        .await
        .unwrap();
    let failed = cache.get(uri).await.unwrap().unwrap();
    assert_eq!(failed.entries, good.entries);
    assert_eq!(failed.validator, good.validator);
    assert_eq!(failed.last_fetch_success, good.last_fetch_success);
    assert_eq!(failed.last_error.as_deref(), Some("Request timed out after 20s"));
    assert!(failed.last_fetch_attempt >= good.last_fetch_attempt);

    cache
        .update(uri, fetched(vec![entry("2", None, Some(at(2)))], Some("\"v2\"")))
        .await
        .unwrap();
    let recovered = cache.get(uri).await.unwrap().unwrap();
    assert!(recovered.last_error.is_none());
    assert_eq!(recovered.validator.etag.as_deref(), Some("\"v2\""));
    // Entries accumulate; earlier ones are not dropped when they leave the feed
    let ids: Vec<_> = recovered.entries.keys().cloned().collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_first_fetch_failure_creates_record_without_entries() {
    let cache = Cache::open(":memory:").await.unwrap();
    let uri = "https://new.example.org/feed";

    cache
        .update(uri, FetchOutcome::Failed("HTTP error: status 404".to_string()))
        .await
        .unwrap();

    let record = cache.get(uri).await.unwrap().unwrap();
    assert!(record.entries.is_empty());
    assert!(record.last_fetch_success.is_none());
    assert!(record.last_fetch_attempt.is_some());
    assert_eq!(record.last_error.as_deref(), Some("HTTP error: status 404"));
}

#[tokio::test]
async fn test_removed_source_kept_in_cache_but_not_rendered() {
    let cache = Cache::open(":memory:").await.unwrap();
    cache
        .update("https://kept.example.org/feed", fetched(vec![entry("k", None, Some(at(1)))], None))
        .await
        .unwrap();
    cache
        .update("https://gone.example.org/feed", fetched(vec![entry("g", None, Some(at(2)))], None))
        .await
        .unwrap();

    let sources = vec![FeedSource::new("https://kept.example.org/feed", "Kept")];
    let pages = aggregator(cache.clone(), 10).build_pages(&sources).await.unwrap();

    let ids: Vec<_> = pages[0].entries.iter().map(|e| e.entry.entry_id.as_str()).collect();
    assert_eq!(ids, vec!["k"]);
    assert!(cache.get("https://gone.example.org/feed").await.unwrap().is_some());
}

// ============================================================================
// Determinism
// ============================================================================

const FEEDS: [&str; 4] = [
    "https://a.example.org/feed",
    "https://b.example.org/feed",
    "https://c.example.org/feed",
    "https://d.example.org/feed",
];

async fn seeded_cache() -> Cache {
    let cache = Cache::open(":memory:").await.unwrap();
    for (i, uri) in FEEDS.iter().enumerate() {
        let entries = vec![
            // Same instant in every feed exercises the tie-break
            entry(&format!("tie-{i}"), None, Some(at(12))),
            entry(&format!("early-{i}"), None, Some(at(i as u32))),
            entry(&format!("undated-{i}"), None, None),
        ];
        cache.update(uri, fetched(entries, None)).await.unwrap();
    }
    cache
}

fn render_pages(sources: &[FeedSource]) -> Vec<u8> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let cache = seeded_cache().await;
        let pages = aggregator(cache, 5).build_pages(sources).await.unwrap();
        serde_json::to_vec(&pages).unwrap()
    })
}

fn sources() -> Vec<FeedSource> {
    FEEDS
        .iter()
        .enumerate()
        .map(|(i, uri)| FeedSource::new(*uri, format!("Feed {i}")))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_pages_independent_of_source_order(shuffled in Just(sources()).prop_shuffle()) {
        let baseline = render_pages(&sources());
        prop_assert_eq!(render_pages(&shuffled), baseline);
    }
}

#[tokio::test]
async fn test_tie_break_and_undated_placement() {
    let cache = seeded_cache().await;
    let pages = aggregator(cache, 100).build_pages(&sources()).await.unwrap();
    let ids: Vec<_> = pages[0].entries.iter().map(|e| e.entry.entry_id.as_str()).collect();

    assert_eq!(
        ids,
        vec![
            "tie-0", "tie-1", "tie-2", "tie-3",
            "early-3", "early-2", "early-1", "early-0",
            "undated-0", "undated-1", "undated-2", "undated-3",
        ]
    );
}
