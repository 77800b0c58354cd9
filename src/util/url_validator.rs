use thiserror::Error;
use url::Url;

/// Errors that can occur during feed URI validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a configured feed URI.
///
/// Only absolute `http`/`https` URLs with a host are accepted. Private and
/// loopback hosts are allowed: the feed list is written by the planet
/// operator, and intranet planets are common.
///
/// # Examples
///
/// ```
/// use planet::util::validate_feed_uri;
///
/// let url = validate_feed_uri("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_uri("file:///etc/passwd").is_err());
/// assert!(validate_feed_uri("not a url").is_err());
/// ```
pub fn validate_feed_uri(uri: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(uri)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}
