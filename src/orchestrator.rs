//! Match orchestration: local fuzzy match first, remote disambiguation only
//! when the local result is not confident, one highlight instruction or one
//! terminal status at the end.
//!
//! Every selection issues a [`LiveToken`]. Issuing a new token makes all older
//! ones stale; a flow checks its token right before each observable effect and
//! drops the effect if it has been superseded. Stale flows still run to
//! completion, they just become invisible.

use crate::fuzzy::{find_best_match, is_confident};
use crate::models::{
    HighlightInstruction, MatchCandidate, MatchOrigin, MatchRequest, PageText, Reference,
};
use crate::remote::{truncate_page_text, Disambiguator, RemoteError, EMPTY_RESPONSE};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;

// ============================================================================
// Liveness
// ============================================================================

/// Monotonic source of request ids. The latest id handed out is the live one.
#[derive(Clone, Default)]
pub struct RequestCounter {
    current: Arc<AtomicU64>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new id, superseding every earlier token.
    pub fn issue(&self) -> LiveToken {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        LiveToken {
            id,
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// Generation token carried through one match flow.
#[derive(Clone, Debug)]
pub struct LiveToken {
    id: u64,
    current: Arc<AtomicU64>,
}

impl LiveToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.id
    }
}

// ============================================================================
// Status and Effects
// ============================================================================

/// Every user-visible status the matching flow can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Matching { reference_id: String, page: u32 },
    NotReady,
    LocalMatch { reference_id: String, score: f64 },
    ContactingRemote { reference_id: String },
    RemoteFallback { reason: String, score: f64 },
    NotLocated { reference_id: String },
    RemoteMatch { reference_id: String },
    Highlighted { label: String, page: u32 },
    HighlightFailed { label: String },
}

impl Status {
    /// Whether this status ends a flow. Located statuses are followed by a
    /// highlight report and are not terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::NotReady
                | Status::NotLocated { .. }
                | Status::Highlighted { .. }
                | Status::HighlightFailed { .. }
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Matching { reference_id, page } => {
                write!(f, "Matching {} on page {} …", reference_id, page)
            }
            Status::NotReady => write!(f, "Page text not ready yet. Please wait a moment."),
            Status::LocalMatch { reference_id, score } => write!(
                f,
                "Fuzzy match succeeded (score {:.2}). Highlighting {}.",
                score, reference_id
            ),
            Status::ContactingRemote { reference_id } => write!(
                f,
                "Fuzzy match was inconclusive for {}. Contacting Gemini …",
                reference_id
            ),
            Status::RemoteFallback { reason, score } => write!(
                f,
                "{}; using algorithmic match (score {:.2}).",
                capitalize_first(reason),
                score
            ),
            Status::NotLocated { reference_id } => write!(
                f,
                "Gemini could not locate {}. Please verify the PDF content.",
                reference_id
            ),
            Status::RemoteMatch { reference_id } => {
                write!(f, "Gemini located the passage for {}.", reference_id)
            }
            Status::Highlighted { label, page } => {
                write!(f, "Highlighted {} on page {}.", label, page)
            }
            Status::HighlightFailed { label } => write!(
                f,
                "Match located for {}, but highlighting failed. Try zooming or clicking again.",
                label
            ),
        }
    }
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Why a remote call did not produce text, as shown to the user.
fn fallback_reason(err: &RemoteError) -> String {
    let message = err.to_string();
    if message.trim().is_empty() {
        "Gemini unavailable".to_string()
    } else {
        message
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffectKind {
    Status(Status),
    Highlight(HighlightInstruction),
}

/// An observable effect, tagged with the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub request_id: u64,
    pub kind: EffectKind,
}

/// Terminal result of one flow, returned to the caller alongside the effects.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Highlight(HighlightInstruction),
    NotReady,
    NotLocated,
    /// A newer request was issued before this flow could finish.
    Superseded,
}

/// Result of applying an instruction to a rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightReport {
    pub request_id: u64,
    pub page_number: u32,
    pub label: String,
    pub highlighted: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator<D> {
    disambiguator: D,
    pages: RwLock<BTreeMap<u32, PageText>>,
    requests: RequestCounter,
    effects: mpsc::UnboundedSender<Effect>,
}

impl<D: Disambiguator> Orchestrator<D> {
    /// Create an orchestrator and the receiving end of its effect stream.
    pub fn new(disambiguator: D) -> (Self, mpsc::UnboundedReceiver<Effect>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            disambiguator,
            pages: RwLock::new(BTreeMap::new()),
            requests: RequestCounter::new(),
            effects: tx,
        };
        (orchestrator, rx)
    }

    /// Install the document's extracted page text, replacing any previous set.
    pub fn set_pages(&self, pages: Vec<PageText>) {
        let mut guard = self.pages.write().unwrap_or_else(|e| e.into_inner());
        *guard = pages.into_iter().map(|p| (p.page_number, p)).collect();
        info!(pages = guard.len(), "page text available for matching");
    }

    pub fn requests(&self) -> &RequestCounter {
        &self.requests
    }

    fn page_text(&self, page_number: u32) -> Option<String> {
        let guard = self.pages.read().unwrap_or_else(|e| e.into_inner());
        guard.get(&page_number).map(|p| p.text.clone())
    }

    /// Send an effect if `token` is still live. Returns whether it was sent.
    fn emit(&self, token: &LiveToken, kind: EffectKind) -> bool {
        if !token.is_live() {
            debug!(request_id = token.id(), "dropping effect from stale request");
            return false;
        }
        if self.effects.send(Effect { request_id: token.id(), kind }).is_err() {
            debug!("effect receiver closed");
        }
        true
    }

    fn status(&self, token: &LiveToken, status: Status) -> bool {
        self.emit(token, EffectKind::Status(status))
    }

    fn highlight(&self, token: &LiveToken, instruction: HighlightInstruction) -> Outcome {
        if self.emit(token, EffectKind::Highlight(instruction.clone())) {
            Outcome::Highlight(instruction)
        } else {
            Outcome::Superseded
        }
    }

    /// Issue a request id for a selection without running it yet.
    pub fn begin(&self) -> LiveToken {
        self.requests.issue()
    }

    /// Issue a new request and run the matching flow for it.
    pub async fn locate(&self, reference: &Reference) -> Outcome {
        let token = self.begin();
        self.run(&token, reference).await
    }

    /// Run the matching flow under an already issued token.
    pub async fn run(&self, token: &LiveToken, reference: &Reference) -> Outcome {
        let request = MatchRequest {
            request_id: token.id(),
            reference_id: reference.reference_id.clone(),
            page_number: reference.page,
            query: reference.query.clone(),
        };
        info!(
            request_id = request.request_id,
            reference_id = %request.reference_id,
            page = request.page_number,
            "match requested"
        );

        self.status(
            token,
            Status::Matching {
                reference_id: request.reference_id.clone(),
                page: request.page_number,
            },
        );

        let page_text = match self.page_text(request.page_number) {
            Some(text) => text,
            None => {
                return if self.status(token, Status::NotReady) {
                    Outcome::NotReady
                } else {
                    Outcome::Superseded
                };
            }
        };

        let local = find_best_match(&request.query, &page_text);
        if let Some(candidate) = local.as_ref().filter(|c| is_confident(c)) {
            debug!(request_id = request.request_id, score = candidate.score, "confident local match");
            if !self.status(
                token,
                Status::LocalMatch {
                    reference_id: request.reference_id.clone(),
                    score: candidate.score,
                },
            ) {
                return Outcome::Superseded;
            }
            return self.highlight(
                token,
                HighlightInstruction {
                    request_id: request.request_id,
                    page_number: request.page_number,
                    primary_text: candidate.substring.clone(),
                    fallback_text: None,
                    label: request.reference_id.clone(),
                    origin: MatchOrigin::Local {
                        score: candidate.score,
                    },
                },
            );
        }

        debug!(
            request_id = request.request_id,
            score = local.as_ref().map(|c| c.score).unwrap_or(0.0),
            "local match inconclusive"
        );
        self.status(
            token,
            Status::ContactingRemote {
                reference_id: request.reference_id.clone(),
            },
        );

        let remote = self
            .disambiguator
            .resolve(
                request.page_number,
                truncate_page_text(&page_text),
                &request.query,
            )
            .await;

        if !token.is_live() {
            debug!(request_id = request.request_id, "discarding superseded remote result");
            return Outcome::Superseded;
        }

        let local = local.filter(|c| !c.is_empty());
        match remote {
            Ok(text) if !text.trim().is_empty() => {
                if !self.status(
                    token,
                    Status::RemoteMatch {
                        reference_id: request.reference_id.clone(),
                    },
                ) {
                    return Outcome::Superseded;
                }
                self.highlight(
                    token,
                    HighlightInstruction {
                        request_id: request.request_id,
                        page_number: request.page_number,
                        primary_text: text.trim().to_string(),
                        fallback_text: local.map(|c| c.substring),
                        label: request.reference_id.clone(),
                        origin: MatchOrigin::Remote,
                    },
                )
            }
            other => {
                let err = match other {
                    Err(e) => e,
                    Ok(_) => RemoteError::EmptyResponse(EMPTY_RESPONSE.to_string()),
                };
                warn!(request_id = request.request_id, error = %err, "remote disambiguation failed");
                self.fall_back(token, &request, local, &err)
            }
        }
    }

    fn fall_back(
        &self,
        token: &LiveToken,
        request: &MatchRequest,
        local: Option<MatchCandidate>,
        err: &RemoteError,
    ) -> Outcome {
        match local {
            Some(candidate) => {
                if !self.status(
                    token,
                    Status::RemoteFallback {
                        reason: fallback_reason(err),
                        score: candidate.score,
                    },
                ) {
                    return Outcome::Superseded;
                }
                self.highlight(
                    token,
                    HighlightInstruction {
                        request_id: request.request_id,
                        page_number: request.page_number,
                        primary_text: candidate.substring,
                        fallback_text: None,
                        label: request.reference_id.clone(),
                        origin: MatchOrigin::LocalFallback {
                            score: candidate.score,
                        },
                    },
                )
            }
            None => {
                if self.status(
                    token,
                    Status::NotLocated {
                        reference_id: request.reference_id.clone(),
                    },
                ) {
                    Outcome::NotLocated
                } else {
                    Outcome::Superseded
                }
            }
        }
    }

    /// Turn a highlight attempt into its final status, if the request is still live.
    pub fn report_highlight(&self, report: &HighlightReport) -> Option<Status> {
        if self.requests.current() != report.request_id {
            debug!(request_id = report.request_id, "ignoring highlight report from stale request");
            return None;
        }
        let status = if report.highlighted {
            Status::Highlighted {
                label: report.label.clone(),
                page: report.page_number,
            }
        } else {
            Status::HighlightFailed {
                label: report.label.clone(),
            }
        };
        if self
            .effects
            .send(Effect {
                request_id: report.request_id,
                kind: EffectKind::Status(status.clone()),
            })
            .is_err()
        {
            debug!("effect receiver closed");
        }
        Some(status)
    }
}
