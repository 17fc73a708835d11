//! Validation of configured upstream endpoints.
//!
//! The generation API base URL comes from the environment. It must be an
//! absolute http(s) URL with a host, and plain HTTP is only accepted for
//! loopback hosts (local fakes and proxies), so the API key never crosses the
//! network unencrypted.

use std::net::IpAddr;
use url::Url;

/// Result of URL validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    /// URL is malformed or cannot be parsed
    InvalidUrl(String),
    /// Scheme is neither http nor https
    UnsupportedScheme(String),
    /// Plain HTTP to a non-loopback host
    NotHttps(String),
    /// URL carries credentials, a query, or a fragment
    UnexpectedComponent(&'static str),
}

impl std::fmt::Display for UrlValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlValidationError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            UrlValidationError::UnsupportedScheme(scheme) => {
                write!(f, "Unsupported URL scheme: {}", scheme)
            }
            UrlValidationError::NotHttps(host) => {
                write!(f, "Only HTTPS is allowed for non-local host: {}", host)
            }
            UrlValidationError::UnexpectedComponent(part) => {
                write!(f, "Endpoint URL must not include a {}", part)
            }
        }
    }
}

impl std::error::Error for UrlValidationError {}

/// Check if a host names the local machine
fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Validate an API base URL taken from configuration.
pub fn validate_api_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())
        .map_err(|e| UrlValidationError::InvalidUrl(e.to_string()))?;

    let host = url
        .host_str()
        .ok_or_else(|| UrlValidationError::InvalidUrl("No host in URL".to_string()))?
        .to_string();

    match url.scheme() {
        "https" => {}
        "http" if is_loopback_host(&host) => {}
        "http" => return Err(UrlValidationError::NotHttps(host)),
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::UnexpectedComponent("username or password"));
    }
    if url.query().is_some() {
        return Err(UrlValidationError::UnexpectedComponent("query string"));
    }
    if url.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedComponent("fragment"));
    }

    Ok(url)
}
