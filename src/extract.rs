//! Per-page text extraction.
//!
//! The PDF engine is a collaborator behind [`PdfEngine`]: it reports a page
//! count and, for each page, the ordered text fragments of that page. Page text
//! is the plain concatenation of those fragments, which is also what the
//! rendered fragment map concatenates to, so offsets agree between the two.

use crate::models::PageText;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Cannot read PDF {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pdf-extract failed: {0}")]
    Pdf(String),

    #[error("Page {0} is out of range")]
    PageOutOfRange(u32),
}

/// What the matching pipeline needs from a PDF engine.
pub trait PdfEngine {
    fn page_count(&self) -> u32;

    /// Text fragments of a 1-based page, in document order.
    fn text_fragments(&self, page_number: u32) -> Result<Vec<String>, ExtractError>;
}

/// Join a page's fragments into its plain text.
pub fn text_content_to_string<S: AsRef<str>>(items: &[S]) -> String {
    items.iter().map(|s| s.as_ref()).collect()
}

/// Extract every page's text, ordered by page number.
pub fn extract_pages<E: PdfEngine + ?Sized>(engine: &E) -> Result<Vec<PageText>, ExtractError> {
    let count = engine.page_count();
    let mut pages = Vec::with_capacity(count as usize);

    for page_number in 1..=count {
        let fragments = engine.text_fragments(page_number)?;
        let text = text_content_to_string(&fragments);
        debug!(page_number, chars = text.len(), "extracted page text");
        pages.push(PageText { page_number, text });
    }

    info!(pages = pages.len(), "document text extracted");
    Ok(pages)
}

// ============================================================================
// pdf-extract Backend
// ============================================================================

/// [`PdfEngine`] backed by the `pdf-extract` crate. Each line of a page
/// (including its trailing newline) is one fragment.
pub struct PdfExtractEngine {
    pages: Vec<String>,
}

impl PdfExtractEngine {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExtractError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        Ok(Self { pages })
    }

    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    /// Build from already-split page strings.
    pub fn from_pages(pages: Vec<String>) -> Self {
        Self { pages }
    }
}

impl PdfEngine for PdfExtractEngine {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn text_fragments(&self, page_number: u32) -> Result<Vec<String>, ExtractError> {
        let index = page_number
            .checked_sub(1)
            .ok_or(ExtractError::PageOutOfRange(page_number))? as usize;
        let page = self
            .pages
            .get(index)
            .ok_or(ExtractError::PageOutOfRange(page_number))?;
        Ok(page.split_inclusive('\n').map(str::to_string).collect())
    }
}

/// Load a PDF from disk and extract its page text.
pub fn extract_pdf_pages(path: &Path) -> Result<Vec<PageText>, ExtractError> {
    let engine = PdfExtractEngine::from_path(path)?;
    extract_pages(&engine)
}
