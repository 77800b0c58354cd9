//! Subscription link audit.
//!
//! Probes every configured feed URI (and the feed's site link, taken from the
//! `truelink` or `link` metadata) and reports the ones that now redirect or
//! no longer answer, so the operator can update or drop them. Some hosts
//! block automated clients, so an `Unavailable` result deserves a manual
//! second look before removal.
use futures::stream::{self, StreamExt};
use std::time::Duration;

use crate::feed::FeedSource;

/// Metadata keys holding a feed's site URL.
const SITE_LINK_KEYS: [&str; 2] = ["truelink", "link"];

/// Outcome of probing one URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkStatus {
    /// 2xx without redirects.
    Normal,
    /// 2xx reached after at least one redirect; holds the final URL.
    Moved(String),
    /// Non-2xx answer, transport error or timeout.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReport {
    pub url: String,
    pub status: LinkStatus,
}

/// Probe every feed URI and site link (`truelink` / `link` metadata) of
/// `sources`.
///
/// URLs shared by several sources are probed once. Reports come back sorted
/// by URL.
pub async fn check_urls(
    client: &reqwest::Client,
    sources: &[FeedSource],
    concurrency: usize,
    timeout: Duration,
) -> Vec<LinkReport> {
    let mut urls: Vec<&str> = sources
        .iter()
        .flat_map(|s| {
            std::iter::once(s.uri.as_str()).chain(
                SITE_LINK_KEYS
                    .iter()
                    .filter_map(|key| s.metadata.get(*key).map(String::as_str)),
            )
        })
        .filter(|u| !u.trim().is_empty())
        .collect();
    urls.sort_unstable();
    urls.dedup();

    let mut reports: Vec<LinkReport> = stream::iter(urls)
        .map(|url| async move {
            LinkReport {
                url: url.to_string(),
                status: probe(client, url, timeout).await,
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    reports.sort_by(|a, b| a.url.cmp(&b.url));
    reports
}

async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> LinkStatus {
    tracing::debug!(url = %url, "Probing link");

    let response = match tokio::time::timeout(timeout, client.get(url).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!(url = %url, error = %e, "Link unreachable");
            return LinkStatus::Unavailable;
        }
        Err(_) => {
            tracing::warn!(url = %url, "Link timed out");
            return LinkStatus::Unavailable;
        }
    };

    if !response.status().is_success() {
        tracing::warn!(url = %url, status = %response.status(), "Link returned error status");
        return LinkStatus::Unavailable;
    }

    // reqwest follows redirects; a different final URL means we were redirected
    let final_url = response.url().as_str();
    if same_url(url, final_url) {
        LinkStatus::Normal
    } else {
        LinkStatus::Moved(final_url.to_string())
    }
}

// `Url` normalises e.g. a missing trailing slash on a bare host
fn same_url(requested: &str, final_url: &str) -> bool {
    match url::Url::parse(requested) {
        Ok(parsed) => parsed.as_str() == final_url,
        Err(_) => requested == final_url,
    }
}

/// Markdown table of the URLs needing attention. Normal URLs are omitted;
/// rows are sorted lexicographically.
pub fn render_markdown(reports: &[LinkReport]) -> String {
    let mut rows: Vec<String> = reports
        .iter()
        .filter_map(|report| match &report.status {
            LinkStatus::Normal => None,
            LinkStatus::Moved(target) => Some(format!("| 301 Moved | {} | {} |", report.url, target)),
            LinkStatus::Unavailable => Some(format!("| 404 Unavailable | {} | |", report.url)),
        })
        .collect();
    rows.sort();

    let mut out = String::from("| Status | URL | Redirect |\n| --- | --- | --- |\n");
    for row in rows {
        out.push_str(&row);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_check_urls_classifies_links() {
        let server = MockServer::start().await;
        Mock::given(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let base = server.uri();
        let sources = vec![
            FeedSource::new(format!("{base}/ok"), "Ok")
                .with_metadata("truelink", format!("{base}/old")),
            FeedSource::new(format!("{base}/gone"), "Gone"),
        ];

        let reports = check_urls(&reqwest::Client::new(), &sources, 4, Duration::from_secs(5)).await;

        assert_eq!(
            reports,
            vec![
                LinkReport {
                    url: format!("{base}/gone"),
                    status: LinkStatus::Unavailable,
                },
                LinkReport {
                    url: format!("{base}/ok"),
                    status: LinkStatus::Normal,
                },
                LinkReport {
                    url: format!("{base}/old"),
                    status: LinkStatus::Moved(format!("{base}/new")),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_urls_probed_once() {
        let server = MockServer::start().await;
        Mock::given(path("/feed"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let uri = format!("{}/feed", server.uri());
        let sources = vec![FeedSource::new(uri.clone(), "A").with_metadata("link", uri)];
        let reports = check_urls(&reqwest::Client::new(), &sources, 2, Duration::from_secs(5)).await;
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_truelink_and_link_both_checked() {
        let server = MockServer::start().await;
        Mock::given(path("/site"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/home"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/feed"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let base = server.uri();
        let sources = vec![FeedSource::new(format!("{base}/feed"), "A")
            .with_metadata("truelink", format!("{base}/site"))
            .with_metadata("link", format!("{base}/home"))];
        let reports = check_urls(&reqwest::Client::new(), &sources, 2, Duration::from_secs(5)).await;

        let urls: Vec<_> = reports.iter().map(|r| r.url.clone()).collect();
        assert_eq!(
            urls,
            vec![format!("{base}/feed"), format!("{base}/home"), format!("{base}/site")]
        );
        assert_eq!(reports[2].status, LinkStatus::Unavailable);
    }

    #[test]
    fn test_render_markdown_skips_normal_and_sorts() {
        let reports = vec![
            LinkReport {
                url: "https://z.example.org/".to_string(),
                status: LinkStatus::Unavailable,
            },
            LinkReport {
                url: "https://a.example.org/".to_string(),
                status: LinkStatus::Normal,
            },
            LinkReport {
                url: "https://m.example.org/".to_string(),
                status: LinkStatus::Moved("https://n.example.org/".to_string()),
            },
        ];

        assert_eq!(
            render_markdown(&reports),
            "| Status | URL | Redirect |\n\
             | --- | --- | --- |\n\
             | 301 Moved | https://m.example.org/ | https://n.example.org/ |\n\
             | 404 Unavailable | https://z.example.org/ | |\n"
        );
    }

    #[test]
    fn test_same_url_normalises_bare_host() {
        assert!(same_url("https://example.org", "https://example.org/"));
        assert!(!same_url("http://example.org/", "https://example.org/"));
    }
}
