//! Client for the Gemini `generateContent` API.
//!
//! Builds the fixed verbatim-substring prompt, sends it with deterministic
//! generation settings, and extracts the first candidate's text. When the
//! model answers with nothing, the response is inspected for a block reason,
//! a non-STOP finish reason, or a medium/high safety rating so the caller can
//! show why.

use crate::remote::{Disambiguator, RemoteError, EMPTY_RESPONSE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const MAX_OUTPUT_TOKENS: u32 = 256;

const INSTRUCTION: &[&str] = &[
    "Return ONLY the exact substring found in pageText.",
    "Do NOT paraphrase.",
    "Do NOT summarize.",
    "Do NOT modify punctuation.",
    "Do NOT add markdown.",
    "Output must be copy-paste identical to the PDF text.",
];

/// Compose the instruction prelude, the page text and the query into one prompt.
pub fn build_prompt(page_text: &str, query: &str) -> String {
    format!(
        "{}\n\npageText:\n\"\"\"{}\"\"\"\n\nquery:\n\"\"\"{}\"\"\"",
        INSTRUCTION.join(" "),
        page_text,
        query
    )
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub candidate_count: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateRequest {
    pub fn for_prompt(prompt: String) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: MAX_OUTPUT_TOKENS,
                candidate_count: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafetyRating {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub probability: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl GenerateResponse {
    /// The first candidate's text parts, concatenated and trimmed.
    pub fn first_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    /// Best-effort explanation for an empty answer.
    pub fn diagnose_empty(&self) -> String {
        if let Some(feedback) = &self.prompt_feedback {
            if let Some(reason) = feedback.block_reason.as_deref().filter(|r| !r.is_empty()) {
                return format!("Gemini blocked the request ({})", reason);
            }
        }

        let candidate = self.candidates.first();
        if let Some(reason) = candidate
            .and_then(|c| c.finish_reason.as_deref())
            .filter(|r| !r.is_empty() && *r != "STOP")
        {
            return format!("Gemini stopped without text ({})", reason);
        }

        let ratings = candidate
            .map(|c| c.safety_ratings.iter())
            .into_iter()
            .flatten()
            .chain(
                self.prompt_feedback
                    .iter()
                    .flat_map(|f| f.safety_ratings.iter()),
            );
        for rating in ratings {
            if matches!(rating.probability.as_str(), "MEDIUM" | "HIGH") {
                return format!(
                    "Gemini flagged {} as {} risk",
                    rating.category,
                    rating.probability.to_lowercase()
                );
            }
        }

        EMPTY_RESPONSE.to_string()
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: &str,
        base_url: &Url,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RemoteError::MissingCredentials);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Upstream(e.to_string()))?;
        let endpoint = generate_endpoint(base_url, model)?.to_string();
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ask the model for the exact substring of `page_text` matching `query`.
    pub async fn locate_substring(&self, page_text: &str, query: &str) -> Result<String, RemoteError> {
        let request = GenerateRequest::for_prompt(build_prompt(page_text, query));

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteError::Upstream(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Upstream(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Gemini API error".to_string());
            warn!(%status, %message, "Gemini API returned an error");
            return Err(RemoteError::Upstream(message));
        }

        let parsed: GenerateResponse = serde_json::from_slice(&body)
            .map_err(|e| RemoteError::Upstream(format!("Malformed Gemini response: {}", e)))?;

        let text = parsed.first_text();
        if text.is_empty() {
            let reason = parsed.diagnose_empty();
            warn!(%reason, "Gemini produced no usable text");
            return Err(RemoteError::EmptyResponse(reason));
        }

        debug!(chars = text.len(), "Gemini answered");
        Ok(text)
    }
}

/// `{base}/v1beta/models/{model}:generateContent`, keeping any path prefix on `base`.
fn generate_endpoint(base_url: &Url, model: &str) -> Result<Url, RemoteError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&format!("v1beta/models/{}:generateContent", model))
        .map_err(|e| RemoteError::Upstream(format!("Invalid Gemini endpoint: {}", e)))
}

impl Disambiguator for GeminiClient {
    async fn resolve(
        &self,
        _page_number: u32,
        page_text: &str,
        query: &str,
    ) -> Result<String, RemoteError> {
        self.locate_substring(page_text, query).await
    }
}
