//! Tests for the match orchestrator.
//!
//! Remote calls go through in-memory disambiguators: a scripted one that
//! records its calls and answers immediately, and a gated one whose answers
//! are released by the test to control completion order.

use super::*;
use crate::remote::PAGE_TEXT_LIMIT;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::oneshot;

// ============================================================================
// Helpers
// ============================================================================

fn load_fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Cannot load fixture {}: {}", path.display(), e))
}

type Call = (u32, String, String);

struct Scripted {
    reply: Result<String, RemoteError>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Scripted {
    fn new(reply: Result<String, RemoteError>) -> (Self, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                reply,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Disambiguator for Scripted {
    async fn resolve(
        &self,
        page_number: u32,
        page_text: &str,
        query: &str,
    ) -> Result<String, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((page_number, page_text.to_string(), query.to_string()));
        self.reply.clone()
    }
}

/// Answers each query only once the test sends through its gate.
#[derive(Default)]
struct Gated {
    gates: Mutex<HashMap<String, oneshot::Receiver<Result<String, RemoteError>>>>,
}

impl Gated {
    fn gate(&self, query: &str) -> oneshot::Sender<Result<String, RemoteError>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(query.to_string(), rx);
        tx
    }
}

impl Disambiguator for Gated {
    async fn resolve(
        &self,
        _page_number: u32,
        _page_text: &str,
        query: &str,
    ) -> Result<String, RemoteError> {
        let gate = self.gates.lock().unwrap().remove(query);
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(RemoteError::Upstream("gate dropped".to_string()))),
            None => Err(RemoteError::Upstream(format!("no gate for {}", query))),
        }
    }
}

fn reference(id: &str, page: u32, query: &str) -> Reference {
    Reference {
        reference_id: id.to_string(),
        page,
        query: query.to_string(),
    }
}

fn fixture_pages() -> Vec<PageText> {
    vec![
        PageText {
            page_number: 1,
            text: "Interim report Q2 2025".to_string(),
        },
        PageText {
            page_number: 3,
            text: load_fixture("q2_page3.txt"),
        },
    ]
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Effect>) -> Vec<Effect> {
    let mut effects = Vec::new();
    while let Ok(effect) = rx.try_recv() {
        effects.push(effect);
    }
    effects
}

fn statuses(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match &e.kind {
            EffectKind::Status(s) => Some(s.to_string()),
            EffectKind::Highlight(_) => None,
        })
        .collect()
}

fn highlights(effects: &[Effect]) -> Vec<&HighlightInstruction> {
    effects
        .iter()
        .filter_map(|e| match &e.kind {
            EffectKind::Highlight(h) => Some(h),
            EffectKind::Status(_) => None,
        })
        .collect()
}

const PARAPHRASE: &str = "profitability rose roughly a tenth";
const EBITDA_SENTENCE: &str =
    "EBITDA increased 12% to USD 2.3bn (USD 2.1bn), driven by Terminals and improved cost efficiency.";

// ============================================================================
// Request Counter
// ============================================================================

#[test]
fn test_only_latest_token_is_live() {
    let counter = RequestCounter::new();
    let t1 = counter.issue();
    let t2 = counter.issue();
    assert_eq!((t1.id(), t2.id()), (1, 2));
    assert!(!t1.is_live());
    assert!(t2.is_live());

    let t3 = counter.clone().issue();
    assert!(!t2.is_live());
    assert!(t3.is_live());
    assert_eq!(counter.current(), 3);
}

// ============================================================================
// Status Text
// ============================================================================

#[test]
fn test_status_messages() {
    assert_eq!(
        Status::Matching { reference_id: "R1".into(), page: 3 }.to_string(),
        "Matching R1 on page 3 …"
    );
    assert_eq!(
        Status::RemoteFallback { reason: "network down".into(), score: 0.4567 }.to_string(),
        "Network down; using algorithmic match (score 0.46)."
    );
    assert_eq!(
        Status::HighlightFailed { label: "R1".into() }.to_string(),
        "Match located for R1, but highlighting failed. Try zooming or clicking again."
    );
    assert!(!Status::ContactingRemote { reference_id: "R1".into() }.is_terminal());
    assert!(Status::NotReady.is_terminal());
    assert!(Status::NotLocated { reference_id: "R1".into() }.is_terminal());
    assert!(Status::Highlighted { label: "R1".into(), page: 3 }.is_terminal());
    assert!(Status::HighlightFailed { label: "R1".into() }.is_terminal());
}

#[test]
fn test_located_statuses_wait_for_highlight_report() {
    assert!(!Status::LocalMatch { reference_id: "R1".into(), score: 0.9 }.is_terminal());
    assert!(!Status::RemoteMatch { reference_id: "R1".into() }.is_terminal());
    assert!(!Status::RemoteFallback { reason: "timeout".into(), score: 0.4 }.is_terminal());
}

// ============================================================================
// Matching Flow
// ============================================================================

#[tokio::test]
async fn test_confident_local_match_skips_remote() {
    let (remote, calls) = Scripted::new(Ok("unused".to_string()));
    let (orch, mut rx) = Orchestrator::new(remote);
    orch.set_pages(fixture_pages());

    let outcome = orch.locate(&reference("EBITDA-1", 3, "EBITDA increased 12%")).await;

    let Outcome::Highlight(instruction) = outcome else {
        panic!("expected a highlight, got {:?}", outcome);
    };
    assert_eq!(instruction.primary_text, "EBITDA increased 12%");
    assert_eq!(instruction.page_number, 3);
    assert_eq!(instruction.fallback_text, None);
    assert_eq!(instruction.origin, MatchOrigin::Local { score: 1.0 });
    assert!(calls.lock().unwrap().is_empty());

    let effects = drain(&mut rx);
    assert_eq!(
        statuses(&effects),
        vec![
            "Matching EBITDA-1 on page 3 …",
            "Fuzzy match succeeded (score 1.00). Highlighting EBITDA-1.",
        ]
    );
    assert_eq!(highlights(&effects), vec![&instruction]);
}

#[tokio::test]
async fn test_low_confidence_goes_remote_with_truncated_text() {
    let (remote, calls) = Scripted::new(Ok(format!("  {}\n", EBITDA_SENTENCE)));
    let (orch, mut rx) = Orchestrator::new(remote);
    let mut long_page = load_fixture("q2_page3.txt");
    while long_page.chars().count() <= PAGE_TEXT_LIMIT {
        long_page.push_str(" Appendix table continues with segment detail.");
    }
    orch.set_pages(vec![PageText { page_number: 3, text: long_page.clone() }]);

    let outcome = orch.locate(&reference("EBITDA-2", 3, PARAPHRASE)).await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (page, sent_text, query) = &calls[0];
    assert_eq!(*page, 3);
    assert_eq!(query, PARAPHRASE);
    assert_eq!(sent_text.chars().count(), PAGE_TEXT_LIMIT);
    assert!(long_page.starts_with(sent_text.as_str()));

    let Outcome::Highlight(instruction) = outcome else {
        panic!("expected a highlight, got {:?}", outcome);
    };
    assert_eq!(instruction.primary_text, EBITDA_SENTENCE);
    assert_eq!(instruction.origin, MatchOrigin::Remote);
    assert!(instruction.fallback_text.as_deref().is_some_and(|t| !t.is_empty()));

    let effects = drain(&mut rx);
    assert_eq!(
        statuses(&effects),
        vec![
            "Matching EBITDA-2 on page 3 …",
            "Fuzzy match was inconclusive for EBITDA-2. Contacting Gemini …",
            "Gemini located the passage for EBITDA-2.",
        ]
    );
}

#[tokio::test]
async fn test_remote_empty_falls_back_to_local_candidate() {
    let (remote, _calls) = Scripted::new(Err(RemoteError::EmptyResponse(
        "Gemini stopped without text (MAX_TOKENS)".to_string(),
    )));
    let (orch, mut rx) = Orchestrator::new(remote);
    orch.set_pages(fixture_pages());

    let outcome = orch.locate(&reference("EBITDA-2", 3, PARAPHRASE)).await;

    let Outcome::Highlight(instruction) = outcome else {
        panic!("expected a highlight, got {:?}", outcome);
    };
    assert_eq!(instruction.primary_text, "and improved cost efficiency. EBIT");
    assert!(matches!(instruction.origin, MatchOrigin::LocalFallback { score } if score < 0.3));

    let effects = drain(&mut rx);
    assert_eq!(
        statuses(&effects).last().map(String::as_str),
        Some("Gemini stopped without text (MAX_TOKENS); using algorithmic match (score 0.28).")
    );
}

#[tokio::test]
async fn test_missing_credentials_treated_as_unavailable() {
    let (remote, _calls) = Scripted::new(Err(RemoteError::MissingCredentials));
    let (orch, mut rx) = Orchestrator::new(remote);
    orch.set_pages(fixture_pages());

    let outcome = orch.locate(&reference("EBITDA-2", 3, PARAPHRASE)).await;
    assert!(matches!(outcome, Outcome::Highlight(_)));

    let effects = drain(&mut rx);
    assert_eq!(
        statuses(&effects).last().map(String::as_str),
        Some("Missing GEMINI_API_KEY environment variable; using algorithmic match (score 0.28).")
    );
}

#[tokio::test]
async fn test_blank_remote_answer_counts_as_empty() {
    let (remote, _calls) = Scripted::new(Ok("   ".to_string()));
    let (orch, mut rx) = Orchestrator::new(remote);
    orch.set_pages(fixture_pages());

    let outcome = orch.locate(&reference("EBITDA-2", 3, PARAPHRASE)).await;
    assert!(matches!(
        outcome,
        Outcome::Highlight(HighlightInstruction { origin: MatchOrigin::LocalFallback { .. }, .. })
    ));
    let effects = drain(&mut rx);
    assert!(statuses(&effects)
        .last()
        .unwrap()
        .starts_with("Gemini returned an empty response; using algorithmic match"));
}

#[tokio::test]
async fn test_nothing_located_when_remote_fails_and_local_is_empty() {
    let (remote, calls) = Scripted::new(Err(RemoteError::Upstream("connection refused".into())));
    let (orch, mut rx) = Orchestrator::new(remote);
    // Two tokens: no window is ever scored, so the local candidate is empty.
    orch.set_pages(vec![PageText { page_number: 2, text: "Q2 results".to_string() }]);

    let outcome = orch.locate(&reference("CASH-1", 2, "cash flow weakened")).await;

    assert_eq!(outcome, Outcome::NotLocated);
    assert_eq!(calls.lock().unwrap().len(), 1);
    let effects = drain(&mut rx);
    assert!(highlights(&effects).is_empty());
    assert_eq!(
        statuses(&effects).last().map(String::as_str),
        Some("Gemini could not locate CASH-1. Please verify the PDF content.")
    );
}

#[tokio::test]
async fn test_missing_page_is_not_ready() {
    let (remote, calls) = Scripted::new(Ok("unused".to_string()));
    let (orch, mut rx) = Orchestrator::new(remote);

    let outcome = orch.locate(&reference("EBITDA-1", 3, "EBITDA increased 12%")).await;

    assert_eq!(outcome, Outcome::NotReady);
    assert!(calls.lock().unwrap().is_empty());
    let effects = drain(&mut rx);
    assert_eq!(
        statuses(&effects).last().map(String::as_str),
        Some("Page text not ready yet. Please wait a moment.")
    );
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test]
async fn test_only_latest_request_produces_effects() {
    let gated = Gated::default();
    let gate1 = gated.gate("cash generation weakened noticeably");
    let gate2 = gated.gate("shareholder payouts continued steadily");
    let gate3 = gated.gate(PARAPHRASE);
    let (orch, mut rx) = Orchestrator::new(gated);
    orch.set_pages(fixture_pages());

    let r1 = reference("CASH-1", 3, "cash generation weakened noticeably");
    let r2 = reference("RETURN-1", 3, "shareholder payouts continued steadily");
    let r3 = reference("EBITDA-2", 3, PARAPHRASE);
    let t1 = orch.begin();
    let t2 = orch.begin();
    let t3 = orch.begin();

    let (o1, o2, o3, ()) = tokio::join!(
        orch.run(&t1, &r1),
        orch.run(&t2, &r2),
        orch.run(&t3, &r3),
        async {
            // Newest answer first, then the stale ones.
            gate3.send(Ok(EBITDA_SENTENCE.to_string())).unwrap();
            tokio::task::yield_now().await;
            gate1.send(Ok("Free cash flow was USD 0.5bn".to_string())).unwrap();
            tokio::task::yield_now().await;
            gate2.send(Ok("Cash return to shareholders".to_string())).unwrap();
        }
    );

    assert_eq!(o1, Outcome::Superseded);
    assert_eq!(o2, Outcome::Superseded);
    assert!(matches!(o3, Outcome::Highlight(ref h) if h.primary_text == EBITDA_SENTENCE));

    let effects = drain(&mut rx);
    assert!(!effects.is_empty());
    assert!(effects.iter().all(|e| e.request_id == 3), "{:?}", effects);
    assert_eq!(highlights(&effects).len(), 1);
}

#[tokio::test]
async fn test_new_selection_discards_in_flight_remote_result() {
    let gated = Gated::default();
    let gate = gated.gate(PARAPHRASE);
    let (orch, mut rx) = Orchestrator::new(gated);
    orch.set_pages(fixture_pages());

    let slow = reference("EBITDA-2", 3, PARAPHRASE);
    let fast = reference("EBITDA-1", 3, "EBITDA increased 12%");

    let (first, second) = tokio::join!(orch.locate(&slow), async {
        tokio::task::yield_now().await;
        let outcome = orch.locate(&fast).await;
        gate.send(Ok(EBITDA_SENTENCE.to_string())).unwrap();
        outcome
    });

    assert_eq!(first, Outcome::Superseded);
    assert!(matches!(second, Outcome::Highlight(ref h) if h.request_id == 2));

    let effects = drain(&mut rx);
    let shown = highlights(&effects);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].primary_text, "EBITDA increased 12%");
    // The slow flow only spoke while it was still live.
    assert!(effects
        .iter()
        .filter(|e| e.request_id == 1)
        .all(|e| matches!(&e.kind, EffectKind::Status(s) if !s.is_terminal())));
}

#[tokio::test]
async fn test_highlight_reports_only_count_for_live_request() {
    let (remote, _calls) = Scripted::new(Ok("unused".to_string()));
    let (orch, mut rx) = Orchestrator::new(remote);
    orch.set_pages(fixture_pages());

    let Outcome::Highlight(instruction) =
        orch.locate(&reference("EBITDA-1", 3, "EBITDA increased 12%")).await
    else {
        panic!("expected a highlight");
    };
    drain(&mut rx);

    let report = HighlightReport {
        request_id: instruction.request_id,
        page_number: 3,
        label: "EBITDA-1".to_string(),
        highlighted: true,
    };
    assert_eq!(
        orch.report_highlight(&report).map(|s| s.to_string()),
        Some("Highlighted EBITDA-1 on page 3.".to_string())
    );

    let failed = HighlightReport { highlighted: false, ..report.clone() };
    assert_eq!(
        orch.report_highlight(&failed),
        Some(Status::HighlightFailed { label: "EBITDA-1".to_string() })
    );

    orch.begin();
    assert_eq!(orch.report_highlight(&report), None);
    assert_eq!(drain(&mut rx).len(), 2);
}
