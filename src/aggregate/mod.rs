//! Aggregation: poll every feed, record results in the cache, then merge the
//! cached entries into one paginated timeline.
//!
//! # Architecture
//!
//! - [`Aggregator::run`] polls all sources through a bounded worker pool,
//!   then builds pages from the cache.
//! - [`Aggregator::build_pages`] builds pages from the cache only (no network).
//! - [`timeline`] holds the pure merge/sort/paginate logic.
//! - [`report`] holds per-feed run diagnostics.
//!
//! Pages depend only on cache contents, never on worker completion order or
//! on the order of the `sources` slice.

mod report;
mod timeline;

pub use report::{FailureKind, RunReport, SourceOutcome, SourceStatus};
pub use timeline::{Page, PageEntry};

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::feed::{parse_feed, FeedSource, FetchResponse, Fetcher};
use crate::storage::{Cache, CacheError, FetchOutcome};

/// Errors that stop a run. Per-feed failures never appear here; they are
/// recorded in the cache and in [`RunReport`].
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Invalid options or source list, detected before any fetch starts
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The cache could not be read while building pages
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Immutable run parameters, passed explicitly into the aggregator.
#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub items_per_page: usize,
    pub concurrency_limit: usize,
    /// Default per-feed timeout; a source's own override wins.
    pub feed_timeout: Duration,
    /// Collapse entries from different feeds that share a link.
    pub collapse_cross_feed_duplicates: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            items_per_page: 60,
            concurrency_limit: 8,
            feed_timeout: Duration::from_secs(20),
            collapse_cross_feed_duplicates: false,
        }
    }
}

impl AggregateOptions {
    fn validate(&self) -> Result<NonZeroUsize, AggregateError> {
        if self.concurrency_limit == 0 {
            return Err(AggregateError::Configuration(
                "concurrency_limit must be greater than 0".to_string(),
            ));
        }
        if self.feed_timeout.is_zero() {
            return Err(AggregateError::Configuration(
                "feed_timeout must be greater than 0".to_string(),
            ));
        }
        NonZeroUsize::new(self.items_per_page).ok_or_else(|| {
            AggregateError::Configuration("items_per_page must be greater than 0".to_string())
        })
    }
}

fn validate_sources(sources: &[FeedSource]) -> Result<(), AggregateError> {
    let mut seen = HashSet::with_capacity(sources.len());
    for source in sources {
        if !seen.insert(source.uri.as_str()) {
            return Err(AggregateError::Configuration(format!(
                "duplicate feed URI: {}",
                source.uri
            )));
        }
        if source.timeout_override.is_some_and(|t| t.is_zero()) {
            return Err(AggregateError::Configuration(format!(
                "timeout for {} must be greater than 0",
                source.uri
            )));
        }
    }
    Ok(())
}

/// Result of a full polling run.
#[derive(Debug)]
pub struct RunOutput {
    pub pages: Vec<Page>,
    pub report: RunReport,
}

/// Drives Fetch → Parse → Cache.update for every source, then merges.
#[derive(Clone)]
pub struct Aggregator {
    cache: Cache,
    fetcher: Fetcher,
    options: AggregateOptions,
}

impl Aggregator {
    pub fn new(cache: Cache, fetcher: Fetcher, options: AggregateOptions) -> Self {
        Self {
            cache,
            fetcher,
            options,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Poll every source, then build pages from the updated cache.
    ///
    /// Options and sources are validated before any request is made. After
    /// that, feed failures are contained: the run always returns pages built
    /// from whatever is cached, even if every fetch failed.
    ///
    /// # Behavior
    ///
    /// - At most `concurrency_limit` feeds are fetched at once
    /// - Each feed is abandoned after its own timeout
    /// - Total time is bounded by roughly `timeout * ceil(sources / concurrency_limit)`
    pub async fn run(&self, sources: &[FeedSource]) -> Result<RunOutput, AggregateError> {
        let per_page = self.options.validate()?;
        validate_sources(sources)?;

        let started = Instant::now();
        let statuses: Vec<SourceStatus> = stream::iter(sources)
            .map(|source| self.poll_one(source))
            .buffer_unordered(self.options.concurrency_limit)
            .collect()
            .await;
        let report = RunReport::new(statuses, started.elapsed());
        report.log_summary();

        let pages = self.pages_from_cache(sources, per_page).await?;
        Ok(RunOutput { pages, report })
    }

    /// Build pages from the cache without any network access.
    pub async fn build_pages(&self, sources: &[FeedSource]) -> Result<Vec<Page>, AggregateError> {
        let per_page = self.options.validate()?;
        validate_sources(sources)?;
        self.pages_from_cache(sources, per_page).await
    }

    async fn pages_from_cache(
        &self,
        sources: &[FeedSource],
        per_page: NonZeroUsize,
    ) -> Result<Vec<Page>, AggregateError> {
        let by_uri: HashMap<&str, &FeedSource> =
            sources.iter().map(|s| (s.uri.as_str(), s)).collect();
        let uris: Vec<&str> = by_uri.keys().copied().collect();

        let candidates = self.cache.entries_for(&uris).await?;
        let timeline = timeline::merge(candidates, self.options.collapse_cross_feed_duplicates);
        tracing::debug!(entries = timeline.len(), "Timeline merged");

        Ok(timeline::paginate(timeline, per_page, &by_uri))
    }

    /// One worker: fetch, parse and record a single feed. Never fails; every
    /// problem becomes a `SourceOutcome::Failed`.
    async fn poll_one(&self, source: &FeedSource) -> SourceStatus {
        let started = Instant::now();

        let validator = match self.cache.validator(&source.uri).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(feed = %source.uri, error = %e, "Failed to read validator, fetching unconditionally");
                Default::default()
            }
        };

        let timeout = source.timeout(self.options.feed_timeout);
        let (record, mut outcome) = match self.fetcher.fetch(source, timeout, &validator).await {
            Ok(FetchResponse::NotModified) => (FetchOutcome::NotModified, SourceOutcome::NotModified),
            Ok(FetchResponse::Modified { body, validator }) => match parse_feed(&body) {
                Ok(feed) => {
                    let entries = feed.entries.len();
                    (
                        FetchOutcome::Fetched { feed, validator },
                        SourceOutcome::Updated { entries },
                    )
                }
                Err(e) => (
                    FetchOutcome::Failed(e.to_string()),
                    SourceOutcome::Failed {
                        kind: FailureKind::MalformedFeed,
                        detail: e.to_string(),
                    },
                ),
            },
            Err(e) => (
                FetchOutcome::Failed(e.to_string()),
                SourceOutcome::Failed {
                    kind: FailureKind::from(&e),
                    detail: e.to_string(),
                },
            ),
        };

        if let Err(e) = self.cache.update(&source.uri, record).await {
            tracing::warn!(feed = %source.uri, error = %e, "Failed to record fetch result");
            outcome = SourceOutcome::Failed {
                kind: FailureKind::Cache,
                detail: e.to_string(),
            };
        }

        match &outcome {
            SourceOutcome::Updated { entries } => {
                tracing::debug!(feed = %source.uri, entries = entries, "Feed updated");
            }
            SourceOutcome::NotModified => {}
            SourceOutcome::Failed { kind, detail } => {
                tracing::debug!(feed = %source.uri, kind = %kind, error = %detail, "Feed fetch failed");
            }
        }

        SourceStatus {
            uri: source.uri.clone(),
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn aggregator(options: AggregateOptions) -> Aggregator {
        let cache = Cache::open(":memory:").await.unwrap();
        Aggregator::new(cache, Fetcher::new(reqwest::Client::new()), options)
    }

    #[tokio::test]
    async fn test_zero_items_per_page_fails_fast() {
        let agg = aggregator(AggregateOptions {
            items_per_page: 0,
            ..Default::default()
        })
        .await;

        let result = agg.run(&[FeedSource::new("http://127.0.0.1:9/feed", "x")]).await;
        assert!(matches!(result, Err(AggregateError::Configuration(_))));
        // Nothing was fetched, so nothing was recorded
        assert!(agg.cache().statuses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_concurrency_rejected() {
        let agg = aggregator(AggregateOptions {
            concurrency_limit: 0,
            ..Default::default()
        })
        .await;
        assert!(matches!(
            agg.build_pages(&[]).await,
            Err(AggregateError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_uri_rejected() {
        let agg = aggregator(AggregateOptions::default()).await;
        let sources = vec![
            FeedSource::new("https://example.com/feed", "One"),
            FeedSource::new("https://example.com/feed", "Two"),
        ];
        match agg.run(&sources).await {
            Err(AggregateError::Configuration(msg)) => assert!(msg.contains("duplicate")),
            other => panic!("Expected Configuration error, got {:?}", other.map(|o| o.pages)),
        }
    }

    #[tokio::test]
    async fn test_empty_sources_yield_single_empty_page() {
        let agg = aggregator(AggregateOptions::default()).await;
        let output = agg.run(&[]).await.unwrap();
        assert_eq!(output.pages.len(), 1);
        assert!(output.pages[0].entries.is_empty());
        assert!(!output.pages[0].has_next);
        assert!(output.report.sources.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_feed_reported_and_recorded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let agg = aggregator(AggregateOptions::default()).await;
        let uri = format!("{}/feed", mock_server.uri());
        let output = agg.run(&[FeedSource::new(uri.clone(), "Broken")]).await.unwrap();

        match &output.report.sources[0].outcome {
            SourceOutcome::Failed { kind, .. } => assert_eq!(*kind, FailureKind::MalformedFeed),
            other => panic!("Expected MalformedFeed failure, got {:?}", other),
        }
        let status = agg.cache().status(&uri).await.unwrap().unwrap();
        assert!(status.last_error.unwrap().contains("Malformed feed"));
    }
}
