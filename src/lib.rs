//! Evidence explorer library - citation location inside a PDF.
//!
//! Given a citation from an analyst's findings and the page it points at, the
//! matching pipeline finds the passage in the page's extracted text (fuzzy
//! match first, language model fallback second) and maps it back onto the
//! rendered text fragments so it can be highlighted.
//!
//! - `extract`: per-page text extraction
//! - `fuzzy`: approximate matcher
//! - `remote` / `gemini`: remote disambiguation
//! - `orchestrator`: request sequencing, liveness and status messages
//! - `highlight`: fragment maps and highlight application
//! - `handlers`: HTTP routes

use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod extract;
pub mod fuzzy;
pub mod gemini;
pub mod handlers;
pub mod highlight;
pub mod models;
pub mod orchestrator;
pub mod remote;
pub mod url_validator;

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_PDF_PATH: &str = "public/document.pdf";
pub const DEFAULT_FINDINGS_PATH: &str = "data/analysis.json";

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub config: Config,
    pub pages: Arc<Vec<PageText>>,
    pub findings: Option<Findings>,
    /// `None` when no API key is configured.
    pub gemini: Option<GeminiClient>,
}

impl AppState {
    /// Assemble state from already-loaded document data.
    pub fn new(config: Config, pages: Vec<PageText>, findings: Option<Findings>) -> Self {
        let gemini = match config.gemini_api_key.as_deref() {
            Some(key) => match GeminiClient::new(
                key,
                &config.gemini_model,
                &config.gemini_base_url,
                config.gemini_timeout,
            ) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "Gemini client unavailable");
                    None
                }
            },
            None => None,
        };

        Self {
            config,
            pages: Arc::new(pages),
            findings,
            gemini,
        }
    }

    /// Load the configured document and findings, then assemble state.
    /// Missing or unreadable inputs are logged and leave that part empty.
    pub async fn load(config: Config) -> Self {
        let pdf_path = config.pdf_path.clone();
        let pages = match tokio::task::spawn_blocking(move || extract_pdf_pages(&pdf_path)).await {
            Ok(Ok(pages)) => pages,
            Ok(Err(e)) => {
                warn!(error = %e, "document text unavailable");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "text extraction task failed");
                Vec::new()
            }
        };

        let findings = match load_findings(&config.findings_path) {
            Ok(findings) => Some(findings),
            Err(e) => {
                warn!(error = %e, "findings data unavailable");
                None
            }
        };

        info!(
            pages = pages.len(),
            findings = findings.as_ref().map(|f| f.findings.len()).unwrap_or(0),
            "document loaded"
        );
        Self::new(config, pages, findings)
    }

    pub fn page(&self, page_number: u32) -> Option<&PageText> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }
}

/// Read the findings data file.
pub fn load_findings(path: &Path) -> Result<Findings, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("Cannot parse {}: {}", path.display(), e))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let document = ServeFile::new(&state.config.pdf_path);

    Router::new()
        .route(
            "/api/gemini",
            post(handlers::gemini_locate).fallback(handlers::method_not_allowed),
        )
        .route("/api/pages", get(handlers::pages))
        .route("/api/pages/{page}", get(handlers::page))
        .route("/api/findings", get(handlers::findings))
        .route_service("/document.pdf", document)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use extract::{extract_pages, extract_pdf_pages, ExtractError, PdfEngine, PdfExtractEngine};
pub use fuzzy::{find_best_match, normalize, MATCH_THRESHOLD};
pub use gemini::GeminiClient;
pub use highlight::{
    FragmentMap, FragmentSpan, HighlightMapper, HighlightSession, HighlightSurface, RenderedPage,
};
pub use models::{
    Finding, Findings, HighlightInstruction, MatchCandidate, MatchOrigin, MatchRequest, PageText,
    Reference, Summary, SupportingEvidence,
};
pub use orchestrator::{
    Effect, EffectKind, HighlightReport, LiveToken, Orchestrator, Outcome, RequestCounter, Status,
};
pub use remote::{Disambiguator, EndpointDisambiguator, RemoteError, PAGE_TEXT_LIMIT};
pub use url_validator::{validate_api_url, UrlValidationError};
