//! End-to-end workflow runs against scripted stub ports.
//!
//! No external services: each stub implements one port trait and scripts
//! its success, failure, or latency behavior.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use triage_agents::{
    BranchResult, Classification, ClassificationPort, ContextPassage, ContextSet, Dimension,
    EscalationReason, GenerationPort, GenerationResult, Label, PortError, PriorityLabel, Query,
    RetrievalPort, RetryPolicy, RunOptions, SentimentLabel, TicketDraft, TicketId, TicketSink,
    TopicLabel, WorkflowConfig, WorkflowEngine, WorkflowError,
};

// ── Stub ports ───────────────────────────────────────────────────────────────

struct StaticRetrieval {
    passages: Vec<ContextPassage>,
    calls: AtomicU32,
}

impl StaticRetrieval {
    fn with(passages: Vec<ContextPassage>) -> Self {
        Self {
            passages,
            calls: AtomicU32::new(0),
        }
    }

    fn empty() -> Self {
        Self::with(Vec::new())
    }
}

#[async_trait]
impl RetrievalPort for StaticRetrieval {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<ContextPassage>, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.passages.clone())
    }
}

struct DownRetrieval;

#[async_trait]
impl RetrievalPort for DownRetrieval {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<ContextPassage>, PortError> {
        Err(PortError::unavailable("vector store offline"))
    }
}

/// Classifier returning fixed labels, with optional per-dimension failure
/// or latency.
struct ScriptedClassifier {
    confidence: Option<f64>,
    fail_dimension: Option<Dimension>,
    slow_dimension: Option<(Dimension, Duration)>,
}

impl ScriptedClassifier {
    fn healthy() -> Self {
        Self {
            confidence: Some(0.9),
            fail_dimension: None,
            slow_dimension: None,
        }
    }
}

#[async_trait]
impl ClassificationPort for ScriptedClassifier {
    async fn classify(
        &self,
        _text: &str,
        dimension: Dimension,
    ) -> Result<Classification, PortError> {
        if self.fail_dimension == Some(dimension) {
            return Err(PortError::unavailable("classifier backend down"));
        }
        if let Some((slow, delay)) = self.slow_dimension {
            if slow == dimension {
                tokio::time::sleep(delay).await;
            }
        }
        let label = match dimension {
            Dimension::Topic => Label::Topic(TopicLabel::Sso),
            Dimension::Sentiment => Label::Sentiment(SentimentLabel::Neutral),
            Dimension::Priority => Label::Priority(PriorityLabel::P2),
        };
        let mut classification = Classification::new(label);
        if let Some(confidence) = self.confidence {
            classification = classification.with_confidence(confidence);
        }
        Ok(classification)
    }
}

enum GenScript {
    Answer { text: String, cite: Vec<String> },
    CiteUnknown,
}

struct ScriptedGenerator {
    script: GenScript,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    fn answering(text: &str, cite: &[&str]) -> Self {
        Self {
            script: GenScript::Answer {
                text: text.into(),
                cite: cite.iter().map(|s| s.to_string()).collect(),
            },
            calls: AtomicU32::new(0),
        }
    }

    fn citing_unknown() -> Self {
        Self {
            script: GenScript::CiteUnknown,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl GenerationPort for ScriptedGenerator {
    async fn generate(
        &self,
        _query: &str,
        _context: &ContextSet,
    ) -> Result<GenerationResult, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            GenScript::Answer { text, cite } => Ok(GenerationResult::Answered {
                text: text.clone(),
                cited_ids: cite.clone(),
            }),
            GenScript::CiteUnknown => Ok(GenerationResult::Answered {
                text: "made up".into(),
                cited_ids: vec!["not-a-real-chunk".into()],
            }),
        }
    }
}

struct RecordingSink {
    fail: bool,
    drafts: Mutex<Vec<TicketDraft>>,
    counter: AtomicU32,
}

impl RecordingSink {
    fn working() -> Self {
        Self {
            fail: false,
            drafts: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
        }
    }

    fn broken() -> Self {
        Self {
            fail: true,
            drafts: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
        }
    }
}

struct SlowSink {
    delay: Duration,
}

#[async_trait]
impl TicketSink for SlowSink {
    async fn create_ticket(&self, _draft: &TicketDraft) -> Result<TicketId, PortError> {
        tokio::time::sleep(self.delay).await;
        Ok(TicketId("TICKET-late".into()))
    }
}

#[async_trait]
impl TicketSink for RecordingSink {
    async fn create_ticket(&self, draft: &TicketDraft) -> Result<TicketId, PortError> {
        if self.fail {
            return Err(PortError::unavailable("ticket store insert failed"));
        }
        self.drafts.lock().unwrap().push(draft.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TicketId(format!("TICKET-{n}")))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn fast_config() -> WorkflowConfig {
    let mut config = WorkflowConfig::default();
    config.top_k = 3;
    config.per_call_timeout = Duration::from_secs(1);
    config.run_deadline = Duration::from_secs(60);
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        total_wait_cap: Duration::from_secs(1),
        jitter: 0.0,
    };
    config.allowed_domains = Vec::new();
    config.port_concurrency = 4;
    config
}

fn docs_passages() -> Vec<ContextPassage> {
    vec![
        ContextPassage::new("Open Admin > SSO", "https://docs.example.com/sso", "c1", 0.9),
        ContextPassage::new("Pick your IdP", "https://docs.example.com/sso-idp", "c2", 0.8),
        ContextPassage::new("Map user roles", "https://docs.example.com/roles", "c3", 0.6),
    ]
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sso_happy_path_does_not_escalate() {
    let sink = Arc::new(RecordingSink::working());
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(docs_passages())),
        Arc::new(ScriptedClassifier::healthy()),
        Arc::new(ScriptedGenerator::answering(
            "Open Admin > SSO and pick your IdP.",
            &["c1", "c2"],
        )),
        sink.clone(),
        fast_config(),
    );

    let result = engine
        .run(Query::new("How do I set up SSO?"), RunOptions::default())
        .await
        .unwrap();

    assert!(!result.escalation.should_escalate);
    assert_eq!(result.escalation.reason, None);
    assert!(result.ticket_id.is_none());
    assert!(result.ticket_persisted);
    assert!(sink.drafts.lock().unwrap().is_empty());

    assert_eq!(result.context.len(), 3);
    match &result.generation {
        GenerationResult::Answered { cited_ids, .. } => {
            assert_eq!(cited_ids, &["c1", "c2"]);
        }
        GenerationResult::Refused { .. } => panic!("expected an answer"),
    }

    // One entry per dimension, canonical order, all ready.
    let dims: Vec<Dimension> = result.classifications.iter().map(|c| c.dimension).collect();
    assert_eq!(dims, Dimension::ALL.to_vec());
    assert!(result.classifications.iter().all(|c| c.outcome.is_ready()));

    assert_eq!(result.user_message(), "Open Admin > SSO and pick your IdP.");
}

#[tokio::test]
async fn no_context_skips_generation_and_creates_ticket() {
    let generator = Arc::new(ScriptedGenerator::answering("never used", &[]));
    let sink = Arc::new(RecordingSink::working());
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::empty()),
        Arc::new(ScriptedClassifier::healthy()),
        generator.clone(),
        sink.clone(),
        fast_config(),
    );

    let result = engine
        .run(Query::new("Why is lineage broken??"), RunOptions::default())
        .await
        .unwrap();

    // Generation port is never called with empty context.
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    match &result.generation {
        GenerationResult::Refused { reason } => assert_eq!(reason, "no context"),
        GenerationResult::Answered { .. } => panic!("expected a synthesized refusal"),
    }

    assert!(result.escalation.should_escalate);
    assert_eq!(result.escalation.reason, Some(EscalationReason::NoContext));
    assert_eq!(result.ticket_id, Some(TicketId("TICKET-1".into())));
    assert!(result.ticket_persisted);

    let drafts = sink.drafts.lock().unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].reason, EscalationReason::NoContext);
    assert_eq!(drafts[0].subject, "Why is lineage broken??");
    assert!(!drafts[0].idempotency_key.is_empty());
}

#[tokio::test]
async fn retrieval_outage_degrades_to_no_context() {
    let engine = WorkflowEngine::new(
        Arc::new(DownRetrieval),
        Arc::new(ScriptedClassifier::healthy()),
        Arc::new(ScriptedGenerator::answering("unused", &[])),
        Arc::new(RecordingSink::working()),
        fast_config(),
    );

    let result = engine
        .run(Query::new("anything"), RunOptions::default())
        .await
        .unwrap();

    assert!(result.context.is_empty());
    assert_eq!(result.escalation.reason, Some(EscalationReason::NoContext));
    // Classifications still ran despite the retrieval outage.
    assert!(result.classifications.iter().all(|c| c.outcome.is_ready()));
}

#[tokio::test]
async fn sink_failure_returns_unpersisted_result_not_an_error() {
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::empty()),
        Arc::new(ScriptedClassifier::healthy()),
        Arc::new(ScriptedGenerator::answering("unused", &[])),
        Arc::new(RecordingSink::broken()),
        fast_config(),
    );

    let result = engine
        .run(Query::new("Why is lineage broken??"), RunOptions::default())
        .await
        .unwrap();

    assert!(result.escalation.should_escalate);
    assert!(result.ticket_id.is_none());
    assert!(!result.ticket_persisted);
    assert!(result
        .persistence_error
        .as_deref()
        .unwrap()
        .contains("ticket store insert failed"));
    // Computed classification data survives the sink failure.
    assert_eq!(result.classifications.len(), 3);
    assert!(result.classifications.iter().all(|c| c.outcome.is_ready()));
}

#[tokio::test]
async fn one_failing_dimension_does_not_fail_the_run() {
    let classifier = ScriptedClassifier {
        confidence: Some(0.9),
        fail_dimension: Some(Dimension::Sentiment),
        slow_dimension: None,
    };
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(docs_passages())),
        Arc::new(classifier),
        Arc::new(ScriptedGenerator::answering("answer", &["c1"])),
        Arc::new(RecordingSink::working()),
        fast_config(),
    );

    let result = engine
        .run(Query::new("How do I set up SSO?"), RunOptions::default())
        .await
        .unwrap();

    assert!(result
        .classification(Dimension::Topic)
        .unwrap()
        .is_ready());
    assert!(result
        .classification(Dimension::Priority)
        .unwrap()
        .is_ready());
    let sentiment = result.classification(Dimension::Sentiment).unwrap();
    match sentiment {
        BranchResult::Unavailable(reason) => assert!(reason.contains("classifier backend down")),
        BranchResult::Ready(_) => panic!("expected sentiment to be unavailable"),
    }
    assert!(!result.escalation.should_escalate);
}

#[tokio::test(start_paused = true)]
async fn run_deadline_resolves_pending_branch_as_unavailable() {
    let mut config = fast_config();
    config.run_deadline = Duration::from_secs(1);
    config.per_call_timeout = Duration::from_secs(60);
    let classifier = ScriptedClassifier {
        confidence: Some(0.9),
        fail_dimension: None,
        slow_dimension: Some((Dimension::Priority, Duration::from_secs(30))),
    };
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(docs_passages())),
        Arc::new(classifier),
        Arc::new(ScriptedGenerator::answering("answer", &["c1"])),
        Arc::new(RecordingSink::working()),
        config,
    );

    let result = engine
        .run(Query::new("How do I set up SSO?"), RunOptions::default())
        .await
        .unwrap();

    // Completed branches keep their real values; the slow one degrades.
    assert!(result.classification(Dimension::Topic).unwrap().is_ready());
    assert!(result
        .classification(Dimension::Sentiment)
        .unwrap()
        .is_ready());
    match result.classification(Dimension::Priority).unwrap() {
        BranchResult::Unavailable(reason) => assert!(reason.contains("deadline")),
        BranchResult::Ready(_) => panic!("expected priority branch to hit the deadline"),
    }
    assert!(!result.generation.is_refused());
}

#[tokio::test(start_paused = true)]
async fn run_deadline_also_bounds_ticket_persistence() {
    let mut config = fast_config();
    config.run_deadline = Duration::from_secs(1);
    config.per_call_timeout = Duration::from_secs(60);
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::empty()),
        Arc::new(ScriptedClassifier::healthy()),
        Arc::new(ScriptedGenerator::answering("unused", &[])),
        Arc::new(SlowSink {
            delay: Duration::from_secs(30),
        }),
        config,
    );

    let started = tokio::time::Instant::now();
    let result = engine
        .run(Query::new("Why is lineage broken??"), RunOptions::default())
        .await
        .unwrap();

    // The run returns at the deadline instead of waiting out the sink.
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(result.escalation.should_escalate);
    assert!(result.ticket_id.is_none());
    assert!(!result.ticket_persisted);
    assert!(result
        .persistence_error
        .as_deref()
        .unwrap()
        .contains("deadline"));
}

#[tokio::test]
async fn cancellation_aborts_the_run() {
    let opts = RunOptions::default();
    opts.cancel.cancel();

    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(docs_passages())),
        Arc::new(ScriptedClassifier::healthy()),
        Arc::new(ScriptedGenerator::answering("answer", &["c1"])),
        Arc::new(RecordingSink::working()),
        fast_config(),
    );

    let result = engine.run(Query::new("How do I set up SSO?"), opts).await;
    assert!(matches!(result, Err(WorkflowError::Cancelled(_))));
}

#[tokio::test]
async fn blank_query_is_rejected_before_any_call() {
    let retrieval = Arc::new(StaticRetrieval::with(docs_passages()));
    let generator = Arc::new(ScriptedGenerator::answering("answer", &["c1"]));
    let engine = WorkflowEngine::new(
        retrieval.clone(),
        Arc::new(ScriptedClassifier::healthy()),
        generator.clone(),
        Arc::new(RecordingSink::working()),
        fast_config(),
    );

    let result = engine.run(Query::new("   \n\t"), RunOptions::default()).await;
    assert!(matches!(result, Err(WorkflowError::InvalidInput(_))));
    assert_eq!(retrieval.calls.load(Ordering::SeqCst), 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn citing_unknown_passages_is_retried_then_degrades_to_refusal() {
    let generator = Arc::new(ScriptedGenerator::citing_unknown());
    let sink = Arc::new(RecordingSink::working());
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(docs_passages())),
        Arc::new(ScriptedClassifier::healthy()),
        generator.clone(),
        sink.clone(),
        fast_config(),
    );

    let result = engine
        .run(Query::new("How do I set up SSO?"), RunOptions::default())
        .await
        .unwrap();

    // Malformed citations are transient: retried up to the attempt budget.
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    match &result.generation {
        GenerationResult::Refused { reason } => {
            assert!(reason.contains("generation unavailable"));
        }
        GenerationResult::Answered { .. } => panic!("subset violation must not surface an answer"),
    }
    assert_eq!(result.escalation.reason, Some(EscalationReason::Refused));
    assert_eq!(sink.drafts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn allow_list_drops_foreign_domains() {
    let mut config = fast_config();
    config.allowed_domains = vec!["example.com".into()];
    let mut passages = docs_passages();
    passages.push(ContextPassage::new(
        "spam",
        "https://evil.example.net/page",
        "c9",
        0.95,
    ));

    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(passages)),
        Arc::new(ScriptedClassifier::healthy()),
        Arc::new(ScriptedGenerator::answering("answer", &["c1"])),
        Arc::new(RecordingSink::working()),
        config,
    );

    let result = engine
        .run(Query::new("How do I set up SSO?"), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.context.len(), 3);
    assert!(!result.context.contains_id("c9"));
}

#[tokio::test]
async fn dissatisfaction_escalates_even_a_good_answer() {
    let sink = Arc::new(RecordingSink::working());
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(docs_passages())),
        Arc::new(ScriptedClassifier::healthy()),
        Arc::new(ScriptedGenerator::answering("answer", &["c1"])),
        sink.clone(),
        fast_config(),
    );

    let result = engine
        .run(
            Query::new("How do I set up SSO?"),
            RunOptions::dissatisfied(),
        )
        .await
        .unwrap();

    assert_eq!(
        result.escalation.reason,
        Some(EscalationReason::UserDissatisfied)
    );
    assert!(result.ticket_id.is_some());
    assert_eq!(sink.drafts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn low_classification_confidence_escalates_when_gated() {
    let mut config = fast_config();
    config.escalation.min_confidence = Some(0.8);
    let classifier = ScriptedClassifier {
        confidence: Some(0.4),
        fail_dimension: None,
        slow_dimension: None,
    };
    let engine = WorkflowEngine::new(
        Arc::new(StaticRetrieval::with(docs_passages())),
        Arc::new(classifier),
        Arc::new(ScriptedGenerator::answering("answer", &["c1"])),
        Arc::new(RecordingSink::working()),
        config,
    );

    let result = engine
        .run(Query::new("How do I set up SSO?"), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(
        result.escalation.reason,
        Some(EscalationReason::LowConfidence)
    );
    assert!(result.ticket_id.is_some());
}
