//! Utility functions for common operations.
//!
//! - **URL validation**: feed URIs from configuration must be absolute http(s)
//! - **Filesystem**: atomic write-to-temp-then-rename for rendered output

mod fs;
mod url_validator;

pub use fs::atomic_write;
pub use url_validator::{validate_feed_uri, UrlValidationError};
