use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// A subscribed feed as resolved from configuration.
///
/// Identity is the feed URI. `metadata` holds every per-feed key the
/// configuration carried besides the name and timeout (for example a `face`
/// image or a `link` to the author's site) and is forwarded to rendering
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSource {
    pub uri: String,
    pub display_name: String,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip)]
    pub timeout_override: Option<Duration>,
}

impl FeedSource {
    pub fn new(uri: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            display_name: display_name.into(),
            metadata: BTreeMap::new(),
            timeout_override: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// Effective fetch timeout: the per-feed override, else `default`.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_override.unwrap_or(default)
    }
}
