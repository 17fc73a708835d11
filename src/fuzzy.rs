//! Approximate matching of a citation query against a page's extracted text.
//!
//! The page is split into whitespace-delimited tokens, and every contiguous
//! window of tokens whose length is close to the query's word count is scored
//! with a character-bigram Dice coefficient. The highest-scoring window is
//! sliced back out of the original text, so casing and punctuation survive.

use crate::models::{MatchCandidate, Token};
use std::collections::HashMap;

#[cfg(test)]
#[path = "fuzzy_test.rs"]
mod fuzzy_test;

/// Minimum local score that skips the remote fallback.
pub const MATCH_THRESHOLD: f64 = 0.75;

/// Extra words a window may carry beyond the query's own length.
const WINDOW_SLACK: usize = 8;

/// Smallest window ever scored, however short the query.
const MIN_WINDOW: usize = 3;

// ============================================================================
// Normalization
// ============================================================================

/// Lowercase, replace everything outside `[a-z0-9]` and whitespace with a
/// space, collapse whitespace runs, trim.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split text into whitespace-delimited tokens with their byte spans.
///
/// Text without any non-whitespace run degrades to a single token covering
/// the whole string (unless the string is empty).
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start = None;

    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                tokens.push(make_token(text, s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(make_token(text, s, text.len()));
    }

    if tokens.is_empty() && !text.is_empty() {
        tokens.push(make_token(text, 0, text.len()));
    }

    tokens
}

fn make_token(text: &str, start: usize, end: usize) -> Token<'_> {
    let original = &text[start..end];
    Token {
        original,
        start,
        end,
        normalized: normalize(original),
    }
}

// ============================================================================
// Similarity
// ============================================================================

/// Dice coefficient over character bigrams, whitespace ignored.
///
/// Identical inputs score 1.0; inputs shorter than two characters score 0.0
/// otherwise. Repeated bigrams count with multiplicity.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let b: Vec<char> = b.chars().filter(|c| !c.is_whitespace()).collect();

    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for pair in a.windows(2) {
        *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
    }

    let mut shared = 0usize;
    for pair in b.windows(2) {
        if let Some(count) = counts.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }

    (2 * shared) as f64 / (a.len() + b.len() - 2) as f64
}

// ============================================================================
// Window Search
// ============================================================================

/// Find the window of `page_text` that best matches `query`.
///
/// Returns `None` when either input normalizes to nothing. Otherwise returns
/// the best candidate, or [`MatchCandidate::none`] if no window scored above
/// zero. Ties keep the first window seen, iterating window sizes outermost
/// and start positions innermost.
pub fn find_best_match(query: &str, page_text: &str) -> Option<MatchCandidate> {
    let normalized_query = normalize(query);
    if normalized_query.is_empty() || normalize(page_text).is_empty() {
        return None;
    }

    let tokens = tokenize(page_text);
    if tokens.is_empty() {
        return None;
    }

    let query_words = normalized_query.split(' ').count().max(1);
    let min_window = MIN_WINDOW.max(query_words.min(tokens.len()));
    let max_window = tokens.len().min(query_words + WINDOW_SLACK);

    let mut best = MatchCandidate::none();

    for window_size in min_window..=max_window {
        for window in tokens.windows(window_size) {
            let joined = window
                .iter()
                .map(|t| t.normalized.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let score = bigram_similarity(&normalized_query, &normalize(&joined));

            if score > best.score {
                let start = window[0].start;
                let end = window[window.len() - 1].end;
                best = MatchCandidate {
                    score,
                    substring: page_text[start..end].to_string(),
                    start,
                    end,
                };
            }
        }
    }

    Some(best)
}

/// Whether a local candidate is good enough to skip the remote fallback.
pub fn is_confident(candidate: &MatchCandidate) -> bool {
    candidate.score >= MATCH_THRESHOLD && !candidate.is_empty()
}
