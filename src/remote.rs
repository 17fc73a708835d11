//! Remote disambiguation: asking a language model for the verbatim passage
//! when local matching is not confident.
//!
//! Every implementation resolves to `Result<String, RemoteError>`; nothing is
//! allowed to panic or escape past this boundary.

use crate::models::{LocateRequest, LocateResponse};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Characters of page text sent with a remote request.
pub const PAGE_TEXT_LIMIT: usize = 6000;

pub const MISSING_API_KEY: &str = "Missing GEMINI_API_KEY environment variable";
pub const EMPTY_RESPONSE: &str = "Gemini returned an empty response";
const GENERIC_FAILURE: &str = "Gemini request failed";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No credentials configured for the generation service.
    #[error("{}", MISSING_API_KEY)]
    MissingCredentials,

    /// Transport failure, non-2xx status, or an unreadable response body.
    #[error("{0}")]
    Upstream(String),

    /// The model answered with no usable text; carries the diagnosed cause.
    #[error("{0}")]
    EmptyResponse(String),
}

/// Something that can find the verbatim passage of `page_text` a query refers to.
pub trait Disambiguator {
    fn resolve(
        &self,
        page_number: u32,
        page_text: &str,
        query: &str,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;
}

/// First `PAGE_TEXT_LIMIT` characters of a page, cut on a char boundary.
pub fn truncate_page_text(text: &str) -> &str {
    match text.char_indices().nth(PAGE_TEXT_LIMIT) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

// ============================================================================
// Text-Location Endpoint Client
// ============================================================================

/// Client for the `POST /api/gemini` text-location endpoint.
#[derive(Clone)]
pub struct EndpointDisambiguator {
    client: reqwest::Client,
    url: String,
}

impl EndpointDisambiguator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Upstream(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Disambiguator for EndpointDisambiguator {
    async fn resolve(
        &self,
        page_number: u32,
        page_text: &str,
        query: &str,
    ) -> Result<String, RemoteError> {
        let body = LocateRequest {
            page_number: Some(page_number),
            page_text: Some(page_text.to_string()),
            query: Some(query.to_string()),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Upstream(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Upstream(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<LocateResponse>(&body)
                .ok()
                .and_then(|p| p.error)
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("{} ({})", GENERIC_FAILURE, status));
            warn!(%status, %message, "text-location endpoint failed");
            return Err(if status == StatusCode::UNPROCESSABLE_ENTITY {
                RemoteError::EmptyResponse(message)
            } else {
                RemoteError::Upstream(message)
            });
        }

        let payload: LocateResponse = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Upstream(format!("Malformed response: {}", e)))?;

        let matched = payload.matched.unwrap_or_default().trim().to_string();
        if matched.is_empty() {
            return Err(RemoteError::EmptyResponse(EMPTY_RESPONSE.to_string()));
        }
        debug!(chars = matched.len(), "text-location endpoint answered");
        Ok(matched)
    }
}
