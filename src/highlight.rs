//! Mapping matched text back onto rendered text fragments.
//!
//! A rendered page is a sequence of fragments (layout spans) in document
//! order. [`FragmentMap`] records each fragment's byte range in the
//! concatenation of all fragment texts, so a located range can be turned into
//! the set of fragments to mark. The map is an owned value built from each
//! rendering of a page and handed explicitly to the [`HighlightMapper`].

use crate::models::HighlightInstruction;
use crate::orchestrator::HighlightReport;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::ops::Range;
use tokio::sync::mpsc;
use tracing::{debug, info};

// ============================================================================
// Fragment Map
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentSpan<H> {
    pub handle: H,
    pub start: usize,
    pub end: usize,
}

/// Offset index over one rendered page's fragments.
#[derive(Debug, Clone)]
pub struct FragmentMap<H> {
    text: String,
    spans: Vec<FragmentSpan<H>>,
}

impl<H> FragmentMap<H> {
    /// Build from `(handle, visible text)` pairs in document order.
    pub fn build<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = (H, S)>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        let mut spans = Vec::new();
        for (handle, content) in fragments {
            let start = text.len();
            text.push_str(content.as_ref());
            spans.push(FragmentSpan {
                handle,
                start,
                end: text.len(),
            });
        }
        Self { text, spans }
    }

    /// Concatenated text of every fragment.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn spans(&self) -> &[FragmentSpan<H>] {
        &self.spans
    }

    /// Non-empty fragments whose range overlaps `range`.
    pub fn overlapping(&self, range: Range<usize>) -> impl Iterator<Item = &FragmentSpan<H>> {
        self.spans
            .iter()
            .filter(move |s| s.start < s.end && s.start < range.end && s.end > range.start)
    }

    /// Locate `target` in the page text. Case-insensitive, and any whitespace
    /// run in the target, leading and trailing ones included, matches any
    /// whitespace run in the page.
    pub fn locate(&self, target: &str) -> Option<Range<usize>> {
        let pattern = whitespace_tolerant_pattern(target)?;
        pattern.find(&self.text).map(|m| m.range())
    }
}

fn whitespace_tolerant_pattern(target: &str) -> Option<Regex> {
    if target.is_empty() {
        return None;
    }
    let words: Vec<String> = target.split_whitespace().map(regex::escape).collect();
    let mut pattern = String::new();
    if target.starts_with(char::is_whitespace) {
        pattern.push_str(r"\s+");
    }
    pattern.push_str(&words.join(r"\s+"));
    // A whitespace-only target is just the leading `\s+`.
    if target.ends_with(char::is_whitespace) && !words.is_empty() {
        pattern.push_str(r"\s+");
    }
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

// ============================================================================
// Highlight Mapper
// ============================================================================

/// The rendering side: whatever can mark, unmark and reveal a fragment.
pub trait HighlightSurface<H> {
    fn mark(&mut self, handle: &H);
    fn unmark(&mut self, handle: &H);
    fn scroll_into_view(&mut self, handle: &H);
}

/// Applies highlight instructions, keeping at most one highlight set visible.
#[derive(Debug)]
pub struct HighlightMapper<H> {
    marked: Vec<H>,
}

impl<H> Default for HighlightMapper<H> {
    fn default() -> Self {
        Self { marked: Vec::new() }
    }
}

impl<H: Clone> HighlightMapper<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently marked.
    pub fn marked(&self) -> &[H] {
        &self.marked
    }

    /// Remove every mark this mapper has applied.
    pub fn clear<S: HighlightSurface<H>>(&mut self, surface: &mut S) {
        for handle in self.marked.drain(..) {
            surface.unmark(&handle);
        }
    }

    /// Highlight the instruction's text on `map`, trying the fallback text if
    /// the primary text cannot be found. Returns whether anything was marked.
    pub fn apply<S: HighlightSurface<H>>(
        &mut self,
        instruction: &HighlightInstruction,
        map: &FragmentMap<H>,
        surface: &mut S,
    ) -> bool {
        self.clear(surface);

        if self.mark_text(&instruction.primary_text, map, surface) {
            return true;
        }
        match instruction.fallback_text.as_deref() {
            Some(fallback) if fallback != instruction.primary_text => {
                debug!(label = %instruction.label, "primary text not found, trying fallback");
                self.mark_text(fallback, map, surface)
            }
            _ => false,
        }
    }

    fn mark_text<S: HighlightSurface<H>>(
        &mut self,
        target: &str,
        map: &FragmentMap<H>,
        surface: &mut S,
    ) -> bool {
        let Some(range) = map.locate(target) else {
            return false;
        };

        for span in map.overlapping(range) {
            surface.mark(&span.handle);
            self.marked.push(span.handle.clone());
        }
        match self.marked.first() {
            Some(first) => {
                surface.scroll_into_view(first);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Page Layers
// ============================================================================

/// One page's rendering becoming available.
#[derive(Debug, Clone)]
pub struct RenderedPage<H> {
    pub page_number: u32,
    pub map: FragmentMap<H>,
}

/// Fragment maps by page, plus an instruction waiting for its page to render.
pub struct HighlightSession<H, S> {
    layers: HashMap<u32, FragmentMap<H>>,
    pending: Option<HighlightInstruction>,
    mapper: HighlightMapper<H>,
    surface: S,
}

impl<H: Clone, S: HighlightSurface<H>> HighlightSession<H, S> {
    pub fn new(surface: S) -> Self {
        Self {
            layers: HashMap::new(),
            pending: None,
            mapper: HighlightMapper::new(),
            surface,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn mapper(&self) -> &HighlightMapper<H> {
        &self.mapper
    }

    pub fn layer(&self, page_number: u32) -> Option<&FragmentMap<H>> {
        self.layers.get(&page_number)
    }

    /// Take a new instruction. It is applied now if its page has rendered,
    /// otherwise it waits for that page.
    pub fn request(&mut self, instruction: HighlightInstruction) -> Option<HighlightReport> {
        self.pending = Some(instruction);
        self.apply_pending()
    }

    /// Record a (re-)rendered page, replacing any older map for it, and apply
    /// the pending instruction if it targets this page.
    pub fn page_rendered(&mut self, page: RenderedPage<H>) -> Option<HighlightReport> {
        debug!(page = page.page_number, fragments = page.map.spans().len(), "page layer ready");
        let page_number = page.page_number;
        self.layers.insert(page_number, page.map);
        let waiting = self
            .pending
            .as_ref()
            .is_some_and(|i| i.page_number == page_number);
        if waiting {
            self.apply_pending()
        } else {
            None
        }
    }

    /// Wait for the next rendered page on `pages` and record it. Returns
    /// `None` once the channel closes.
    pub async fn next_rendered(
        &mut self,
        pages: &mut mpsc::Receiver<RenderedPage<H>>,
    ) -> Option<Option<HighlightReport>> {
        let page = pages.recv().await?;
        Some(self.page_rendered(page))
    }

    fn apply_pending(&mut self) -> Option<HighlightReport> {
        let instruction = self.pending.as_ref()?;
        let map = self.layers.get(&instruction.page_number)?;
        let highlighted = self.mapper.apply(instruction, map, &mut self.surface);
        info!(
            label = %instruction.label,
            page = instruction.page_number,
            highlighted,
            "highlight applied"
        );
        let report = HighlightReport {
            request_id: instruction.request_id,
            page_number: instruction.page_number,
            label: instruction.label.clone(),
            highlighted,
        };
        self.pending = None;
        Some(report)
    }
}
