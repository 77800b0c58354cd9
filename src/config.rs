//! Configuration file parser for `planet.toml`.
//!
//! Global options sit at the top level; each subscribed feed is a table under
//! `[feeds."<uri>"]`. A feed is disabled by commenting its table out. Keys of a
//! feed table other than `name` and `timeout` are forwarded to rendering as
//! free-form metadata.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::aggregate::AggregateOptions;
use crate::feed::FeedSource;
use crate::util::validate_feed_uri;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Well-formed TOML with values the planet cannot run with.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level planet configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Planet title.
    pub name: String,

    /// Public URL of the generated planet.
    pub link: String,

    pub owner_name: String,
    pub owner_email: String,

    /// Directory holding `planet.db`. Relative paths resolve against the
    /// config file's directory.
    pub cache_directory: PathBuf,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Per-feed fetch timeout in seconds.
    pub feed_timeout: u64,

    /// Theme name, forwarded to the renderer.
    pub output_theme: String,

    /// Directory for rendered output. Relative paths resolve like `cache_directory`.
    pub output_dir: PathBuf,

    pub items_per_page: usize,

    /// Asset globs copied alongside the output by the theme's asset step.
    pub bill_of_materials: Vec<String>,

    /// Maximum number of feeds fetched at once.
    pub concurrency_limit: usize,

    /// Collapse entries from different feeds that share a link.
    pub collapse_cross_feed_duplicates: bool,

    /// User-Agent header for feed requests.
    pub user_agent: Option<String>,

    /// Subscribed feeds keyed by URI.
    pub feeds: BTreeMap<String, toml::Table>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "Planet".to_string(),
            link: String::new(),
            owner_name: String::new(),
            owner_email: String::new(),
            cache_directory: PathBuf::from("cache"),
            log_level: "info".to_string(),
            feed_timeout: 20,
            output_theme: "default".to_string(),
            output_dir: PathBuf::from("output"),
            items_per_page: 60,
            bill_of_materials: Vec::new(),
            concurrency_limit: 8,
            collapse_cross_feed_duplicates: false,
            user_agent: None,
            feeds: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 15] = [
        "name",
        "link",
        "owner_name",
        "owner_email",
        "cache_directory",
        "log_level",
        "feed_timeout",
        "output_theme",
        "output_dir",
        "items_per_page",
        "bill_of_materials",
        "concurrency_limit",
        "collapse_cross_feed_duplicates",
        "user_agent",
        "feeds",
    ];

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing file → `Err(ConfigError::Io)`: a planet without feeds has nothing to do
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Invalid values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let meta = std::fs::metadata(path)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.cache_directory = resolve(base, &config.cache_directory);
        config.output_dir = resolve(base, &config.output_dir);

        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration text. Paths are left as written.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the aggregator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed_timeout == 0 {
            return Err(ConfigError::Invalid(
                "feed_timeout must be greater than 0".to_string(),
            ));
        }
        if self.items_per_page == 0 {
            return Err(ConfigError::Invalid(
                "items_per_page must be greater than 0".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be greater than 0".to_string(),
            ));
        }

        for (uri, table) in &self.feeds {
            validate_feed_uri(uri)
                .map_err(|e| ConfigError::Invalid(format!("feed {uri}: {e}")))?;
            feed_timeout_override(uri, table)?;
        }

        Ok(())
    }

    /// Cache database path inside `cache_directory`.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_directory.join("planet.db")
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            items_per_page: self.items_per_page,
            concurrency_limit: self.concurrency_limit,
            feed_timeout: Duration::from_secs(self.feed_timeout),
            collapse_cross_feed_duplicates: self.collapse_cross_feed_duplicates,
        }
    }

    /// Resolve the configured feeds into sources, ordered by URI.
    pub fn sources(&self) -> Result<Vec<FeedSource>, ConfigError> {
        self.feeds
            .iter()
            .map(|(uri, table)| {
                let display_name = table
                    .get("name")
                    .and_then(toml::Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| uri.clone());

                let metadata = table
                    .iter()
                    .filter(|(key, _)| key.as_str() != "name" && key.as_str() != "timeout")
                    .map(|(key, value)| (key.clone(), metadata_value(value)))
                    .collect();

                Ok(FeedSource {
                    uri: uri.clone(),
                    display_name,
                    metadata,
                    timeout_override: feed_timeout_override(uri, table)?,
                })
            })
            .collect()
    }
}

fn feed_timeout_override(uri: &str, table: &toml::Table) -> Result<Option<Duration>, ConfigError> {
    match table.get("timeout") {
        None => Ok(None),
        Some(toml::Value::Integer(secs)) if *secs > 0 => Ok(Some(Duration::from_secs(*secs as u64))),
        Some(other) => Err(ConfigError::Invalid(format!(
            "feed {uri}: timeout must be a positive integer, got {other}"
        ))),
    }
}

/// Strings pass through verbatim; other TOML values keep their TOML text.
fn metadata_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// ============================================================================
// Tests
// ============================================================================
