use std::fmt;
use std::time::Duration;

use crate::feed::FetchError;

/// Classification of a per-feed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connection,
    Http(u16),
    MalformedResponse,
    MalformedFeed,
    /// The fetch worked but the cache could not record it.
    Cache,
}

impl From<&FetchError> for FailureKind {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::Timeout(_) => FailureKind::Timeout,
            FetchError::Connection(e) if e.is_timeout() => FailureKind::Timeout,
            FetchError::Connection(_) => FailureKind::Connection,
            FetchError::HttpStatus(status) => FailureKind::Http(*status),
            FetchError::BodyRead(_)
            | FetchError::ResponseTooLarge
            | FetchError::IncompleteResponse { .. } => {
                FailureKind::MalformedResponse
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Connection => write!(f, "connection error"),
            FailureKind::Http(status) => write!(f, "HTTP {status}"),
            FailureKind::MalformedResponse => write!(f, "malformed response"),
            FailureKind::MalformedFeed => write!(f, "malformed feed"),
            FailureKind::Cache => write!(f, "cache error"),
        }
    }
}

/// What happened to one feed during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Fresh content parsed; `entries` is the count in the document.
    Updated { entries: usize },
    NotModified,
    Failed { kind: FailureKind, detail: String },
}

#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub uri: String,
    pub outcome: SourceOutcome,
    pub elapsed: Duration,
}

/// Run-level diagnostics. Sources are listed in URI order regardless of
/// the order their workers finished in.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub sources: Vec<SourceStatus>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(mut sources: Vec<SourceStatus>, elapsed: Duration) -> Self {
        sources.sort_by(|a, b| a.uri.cmp(&b.uri));
        Self { sources, elapsed }
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::Updated { .. }))
    }

    pub fn not_modified(&self) -> usize {
        self.count(|o| matches!(o, SourceOutcome::NotModified))
    }

    pub fn failures(&self) -> impl Iterator<Item = &SourceStatus> {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&SourceOutcome) -> bool) -> usize {
        self.sources.iter().filter(|s| pred(&s.outcome)).count()
    }

    pub fn log_summary(&self) {
        let failed = self.failures().count();
        tracing::info!(
            sources = self.sources.len(),
            updated = self.updated(),
            not_modified = self.not_modified(),
            failed = failed,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Poll complete"
        );
        for status in self.failures() {
            if let SourceOutcome::Failed { kind, detail } = &status.outcome {
                tracing::warn!(feed = %status.uri, kind = %kind, error = %detail, "Feed failed this run");
            }
        }
    }
}
