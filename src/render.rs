//! Renderer boundary.
//!
//! The aggregator produces [`Page`]s; a [`Renderer`] turns them into output
//! files. Theme templating lives outside this crate: the bundled
//! [`JsonRenderer`] writes the page model as JSON documents that a theme's
//! template step consumes.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::aggregate::Page;
use crate::config::Config;
use crate::feed::FeedSource;
use crate::storage::FeedStatus;
use crate::util::atomic_write;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize page model: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Per-feed summary for the planet's subscription list.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub uri: String,
    pub name: String,
    pub metadata: BTreeMap<String, String>,
    /// Feed title as last reported by the feed itself.
    pub title: Option<String>,
    pub site_link: Option<String>,
    pub last_fetch_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Everything a theme needs besides the pages themselves.
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext {
    pub name: String,
    pub link: String,
    pub owner_name: String,
    pub owner_email: String,
    pub theme: String,
    pub generated_at: DateTime<Utc>,
    pub bill_of_materials: Vec<String>,
    pub sources: Vec<SourceSummary>,
}

impl RenderContext {
    /// Build the context for the configured sources. `statuses` may include
    /// orphaned feeds; only configured sources are listed, in source order.
    pub fn new(config: &Config, sources: &[FeedSource], statuses: &[FeedStatus]) -> Self {
        let by_uri: HashMap<&str, &FeedStatus> =
            statuses.iter().map(|s| (s.feed_uri.as_str(), s)).collect();

        let sources = sources
            .iter()
            .map(|source| {
                let status = by_uri.get(source.uri.as_str());
                SourceSummary {
                    uri: source.uri.clone(),
                    name: source.display_name.clone(),
                    metadata: source.metadata.clone(),
                    title: status.and_then(|s| s.title.clone()),
                    site_link: status.and_then(|s| s.site_link.clone()),
                    last_fetch_success: status.and_then(|s| s.last_fetch_success),
                    last_error: status.and_then(|s| s.last_error.clone()),
                }
            })
            .collect();

        Self {
            name: config.name.clone(),
            link: config.link.clone(),
            owner_name: config.owner_name.clone(),
            owner_email: config.owner_email.clone(),
            theme: config.output_theme.clone(),
            generated_at: Utc::now(),
            bill_of_materials: config.bill_of_materials.clone(),
            sources,
        }
    }
}

/// Consumes the page model and produces output artifacts.
pub trait Renderer {
    fn render(&self, context: &RenderContext, pages: &[Page]) -> Result<(), RenderError>;
}

#[derive(Serialize)]
struct IndexDocument<'a> {
    #[serde(flatten)]
    context: &'a RenderContext,
    page_count: usize,
    pages: Vec<String>,
}

/// Writes `index.json` plus one `page-N.json` per page into `output_dir`.
///
/// Every file is replaced atomically, so a web server reading the directory
/// never sees a half-written page.
pub struct JsonRenderer {
    output_dir: PathBuf,
}

impl JsonRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn page_file_name(page_number: usize) -> String {
        format!("page-{page_number}.json")
    }

    /// Delete `page-N.json` files left by an earlier, longer render.
    fn remove_stale_pages(&self, page_count: usize) -> Result<(), RenderError> {
        let dir = std::fs::read_dir(&self.output_dir).map_err(write_err(&self.output_dir))?;
        for item in dir {
            let path = item.map_err(write_err(&self.output_dir))?.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(page_number_of)
                .is_some_and(|n| n > page_count);
            if stale {
                tracing::debug!(path = %path.display(), "Removing stale page");
                std::fs::remove_file(&path).map_err(write_err(&path))?;
            }
        }
        Ok(())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), RenderError> {
        let path = self.output_dir.join(name);
        atomic_write(&path, bytes).map_err(|source| RenderError::Write { path, source })
    }
}

impl Renderer for JsonRenderer {
    fn render(&self, context: &RenderContext, pages: &[Page]) -> Result<(), RenderError> {
        ensure_dir(&self.output_dir)?;

        for page in pages {
            let bytes = serde_json::to_vec_pretty(page)?;
            self.write(&Self::page_file_name(page.page_number), &bytes)?;
        }

        let index = IndexDocument {
            context,
            page_count: pages.len(),
            pages: pages
                .iter()
                .map(|p| Self::page_file_name(p.page_number))
                .collect(),
        };
        self.write("index.json", &serde_json::to_vec_pretty(&index)?)?;
        self.remove_stale_pages(pages.len())?;

        tracing::info!(
            output = %self.output_dir.display(),
            pages = pages.len(),
            "Rendered page model"
        );
        Ok(())
    }
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> RenderError {
    let path = path.to_path_buf();
    move |source| RenderError::Write { path, source }
}

fn page_number_of(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

fn ensure_dir(dir: &Path) -> Result<(), RenderError> {
    std::fs::create_dir_all(dir).map_err(|source| RenderError::Write {
        path: dir.to_path_buf(),
        source,
    })
}
