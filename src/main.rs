//! Evidence explorer server.
//!
//! Serves the document, its extracted page text, the findings data, and the
//! text-location endpoint that fronts the Gemini API.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use evidence_explorer::{router, AppState, Config};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("evidence_explorer=info,tower_http=debug")
            }),
        )
        .init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr;

    let state = Arc::new(AppState::load(config).await);
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    info!("Evidence explorer running at http://{}", bind_addr);
    info!("Document: {}", state.config.pdf_path.display());
    if state.gemini.is_some() {
        info!("Gemini fallback: ENABLED (model {})", state.config.gemini_model);
    } else {
        info!("Gemini fallback: DISABLED (set GEMINI_API_KEY to enable)");
    }

    axum::serve(listener, app).await?;
    Ok(())
}
