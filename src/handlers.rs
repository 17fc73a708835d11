//! HTTP route handlers.
//!
//! The text-location endpoint fronts the generation API for browsers; the
//! remaining routes expose the extracted page text and the findings data.

use crate::error::ApiError;
use crate::models::{Findings, LocateRequest, LocateResponse, PageText};
use crate::remote::RemoteError;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

// ============================================================================
// Text Location
// ============================================================================

/// POST /api/gemini: ask the model for the verbatim passage of `pageText`
/// that `query` refers to.
pub async fn gemini_locate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<LocateResponse>, ApiError> {
    let client = state
        .gemini
        .as_ref()
        .ok_or(ApiError::Remote(RemoteError::MissingCredentials))?;

    let request: LocateRequest = if body.is_empty() {
        LocateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid JSON body: {}", e)))?
    };

    let (page_text, query) = match (request.page_text, request.query) {
        (Some(page_text), Some(query)) if !page_text.is_empty() && !query.is_empty() => {
            (page_text, query)
        }
        _ => {
            return Err(ApiError::InvalidRequest(
                "pageText and query are required".to_string(),
            ))
        }
    };

    info!(
        page = request.page_number,
        page_chars = page_text.len(),
        "locating passage with Gemini"
    );
    let matched = client.locate_substring(&page_text, &query).await?;

    Ok(Json(LocateResponse {
        matched: Some(matched),
        error: None,
    }))
}

/// Any other method on the text-location route.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

// ============================================================================
// Document Data
// ============================================================================

/// GET /api/pages
pub async fn pages(State(state): State<Arc<AppState>>) -> Json<Vec<PageText>> {
    Json(state.pages.as_ref().clone())
}

/// GET /api/pages/{page}
pub async fn page(
    State(state): State<Arc<AppState>>,
    Path(page_number): Path<u32>,
) -> Result<Json<PageText>, ApiError> {
    state
        .page(page_number)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Page {} not found", page_number)))
}

/// GET /api/findings
pub async fn findings(State(state): State<Arc<AppState>>) -> Result<Json<Findings>, ApiError> {
    state
        .findings
        .clone()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Findings data not loaded".to_string()))
}
