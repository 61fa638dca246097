//! Core value types for a triage workflow run.
//!
//! Everything here is an immutable value: the orchestrator owns the only
//! mutable state while a run is in flight, and hands these out by value
//! once the run completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state_machine::TransitionRecord;

/// Refusal reason synthesized when retrieval produces no passages.
pub const NO_CONTEXT: &str = "no context";

/// Subject used when a query yields no usable subject line.
pub const DEFAULT_SUBJECT: &str = "Support request";

/// Maximum length of a ticket subject line.
const SUBJECT_MAX_LEN: usize = 200;

// ── Query ────────────────────────────────────────────────────────────────────

/// An incoming support query. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// Raw user text.
    pub text: String,
    /// Optional session or conversation identifier from the caller.
    pub session_id: Option<String>,
    /// When the query entered the system.
    pub created_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Whether the query is empty or whitespace-only (rejected before any
    /// external call).
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

// ── Context ──────────────────────────────────────────────────────────────────

/// A retrieved knowledge-base snippet used to ground an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPassage {
    /// Passage text.
    pub text: String,
    /// Source document URL.
    pub source_url: String,
    /// Stable chunk identifier within the corpus.
    pub chunk_id: String,
    /// Similarity score, clamped to 0.0–1.0.
    pub score: f64,
}

impl ContextPassage {
    pub fn new(
        text: impl Into<String>,
        source_url: impl Into<String>,
        chunk_id: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            text: text.into(),
            source_url: source_url.into(),
            chunk_id: chunk_id.into(),
            score: score.clamp(0.0, 1.0),
        }
    }
}

/// An ordered set of context passages, descending by score, at most top-k.
///
/// Construct via [`ContextSet::from_ranked`] so the ordering and size
/// invariants hold; downstream code only reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextSet {
    passages: Vec<ContextPassage>,
}

impl ContextSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sort by descending score, clamp scores, and keep at most `top_k`.
    pub fn from_ranked(mut passages: Vec<ContextPassage>, top_k: usize) -> Self {
        for p in &mut passages {
            p.score = p.score.clamp(0.0, 1.0);
        }
        passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        passages.truncate(top_k);
        Self { passages }
    }

    pub fn passages(&self) -> &[ContextPassage] {
        &self.passages
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Chunk identifiers in ranked order.
    pub fn ids(&self) -> Vec<&str> {
        self.passages.iter().map(|p| p.chunk_id.as_str()).collect()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.passages.iter().any(|p| p.chunk_id == id)
    }
}

// ── Classification dimensions and labels ─────────────────────────────────────

/// The independent classification dimensions, in canonical output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Topic,
    Sentiment,
    Priority,
}

impl Dimension {
    /// Canonical ordering used in every merged record, regardless of
    /// branch completion order.
    pub const ALL: [Dimension; 3] = [Dimension::Topic, Dimension::Sentiment, Dimension::Priority];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Sentiment => "sentiment",
            Self::Priority => "priority",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed label set for the Topic dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicLabel {
    #[serde(rename = "How-to")]
    HowTo,
    Product,
    Connector,
    Lineage,
    #[serde(rename = "API/SDK")]
    ApiSdk,
    #[serde(rename = "SSO")]
    Sso,
    Glossary,
    #[serde(rename = "Best practices")]
    BestPractices,
    #[serde(rename = "Sensitive data")]
    SensitiveData,
}

impl TopicLabel {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::HowTo => "How-to",
            Self::Product => "Product",
            Self::Connector => "Connector",
            Self::Lineage => "Lineage",
            Self::ApiSdk => "API/SDK",
            Self::Sso => "SSO",
            Self::Glossary => "Glossary",
            Self::BestPractices => "Best practices",
            Self::SensitiveData => "Sensitive data",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        Some(match raw {
            "How-to" => Self::HowTo,
            "Product" => Self::Product,
            "Connector" => Self::Connector,
            "Lineage" => Self::Lineage,
            "API/SDK" => Self::ApiSdk,
            "SSO" => Self::Sso,
            "Glossary" => Self::Glossary,
            "Best practices" => Self::BestPractices,
            "Sensitive data" => Self::SensitiveData,
            _ => return None,
        })
    }
}

/// Fixed label set for the Sentiment dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    Frustrated,
    Curious,
    Angry,
    Neutral,
}

impl SentimentLabel {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Frustrated => "Frustrated",
            Self::Curious => "Curious",
            Self::Angry => "Angry",
            Self::Neutral => "Neutral",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        Some(match raw {
            "Frustrated" => Self::Frustrated,
            "Curious" => Self::Curious,
            "Angry" => Self::Angry,
            "Neutral" => Self::Neutral,
            _ => return None,
        })
    }
}

/// Fixed label set for the Priority dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityLabel {
    P0,
    P1,
    P2,
}

impl PriorityLabel {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        }
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        Some(match raw {
            "P0" => Self::P0,
            "P1" => Self::P1,
            "P2" => Self::P2,
            _ => return None,
        })
    }
}

/// A label bound to the dimension it belongs to.
///
/// Parsing goes through [`Label::parse`], so a label outside a dimension's
/// fixed set is a malformed response, never a valid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Topic(TopicLabel),
    Sentiment(SentimentLabel),
    Priority(PriorityLabel),
}

impl Label {
    pub fn dimension(self) -> Dimension {
        match self {
            Self::Topic(_) => Dimension::Topic,
            Self::Sentiment(_) => Dimension::Sentiment,
            Self::Priority(_) => Dimension::Priority,
        }
    }

    /// Parse a wire-format label for the given dimension.
    pub fn parse(dimension: Dimension, raw: &str) -> Option<Self> {
        match dimension {
            Dimension::Topic => TopicLabel::from_wire(raw).map(Self::Topic),
            Dimension::Sentiment => SentimentLabel::from_wire(raw).map(Self::Sentiment),
            Dimension::Priority => PriorityLabel::from_wire(raw).map(Self::Priority),
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Topic(l) => l.as_wire(),
            Self::Sentiment(l) => l.as_wire(),
            Self::Priority(l) => l.as_wire(),
        }
    }
}

/// One classification output: a label plus optional model confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: Label,
    /// Confidence reported by the classifier, 0.0–1.0 when present.
    pub confidence: Option<f64>,
}

impl Classification {
    pub fn new(label: Label) -> Self {
        Self {
            label,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

// ── Branch settlement ────────────────────────────────────────────────────────

/// What a workflow branch settled to: a real value, or an explicit
/// degraded marker after retries were exhausted.
///
/// A branch never disappears from the final record; it is either `Ready`
/// or `Unavailable` with the reason it degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum BranchResult<T> {
    Ready(T),
    Unavailable(String),
}

impl<T> BranchResult<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn as_ready(&self) -> Option<&T> {
        match self {
            Self::Ready(v) => Some(v),
            Self::Unavailable(_) => None,
        }
    }
}

/// A classification branch outcome pinned to its dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    pub dimension: Dimension,
    pub outcome: BranchResult<Classification>,
}

// ── Generation ───────────────────────────────────────────────────────────────

/// Output of the grounded generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationResult {
    /// A grounded answer citing passages from the supplied context set.
    Answered {
        text: String,
        /// Chunk identifiers of the passages actually used. An answer with
        /// zero citations is a refusal-equivalent for escalation policy.
        cited_ids: Vec<String>,
    },
    /// The model declined to answer.
    Refused { reason: String },
}

impl GenerationResult {
    pub fn refused(reason: impl Into<String>) -> Self {
        Self::Refused {
            reason: reason.into(),
        }
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }

    /// Number of cited passages (zero for refusals).
    pub fn cited_count(&self) -> usize {
        match self {
            Self::Answered { cited_ids, .. } => cited_ids.len(),
            Self::Refused { .. } => 0,
        }
    }
}

// ── Escalation ───────────────────────────────────────────────────────────────

/// Why a run escalated, recorded as the first matching condition in
/// fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    NoContext,
    Refused,
    UserDissatisfied,
    LowConfidence,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContext => write!(f, "no_context"),
            Self::Refused => write!(f, "refused"),
            Self::UserDissatisfied => write!(f, "user_dissatisfied"),
            Self::LowConfidence => write!(f, "low_confidence"),
        }
    }
}

/// The Deciding step's output. Derived per run, never persisted on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub reason: Option<EscalationReason>,
}

impl EscalationDecision {
    pub fn stay() -> Self {
        Self {
            should_escalate: false,
            reason: None,
        }
    }

    pub fn escalate(reason: EscalationReason) -> Self {
        Self {
            should_escalate: true,
            reason: Some(reason),
        }
    }
}

// ── Tickets ──────────────────────────────────────────────────────────────────

/// Identifier assigned by the ticket sink on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub String);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The record handed to the ticket sink when a run escalates.
///
/// The `idempotency_key` is generated once per escalation decision so the
/// sink can deduplicate internal retries of the create call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDraft {
    pub idempotency_key: String,
    pub subject: String,
    pub query: String,
    pub classifications: Vec<DimensionResult>,
    pub generation: GenerationResult,
    pub reason: EscalationReason,
    pub created_at: DateTime<Utc>,
}

impl TicketDraft {
    pub fn new(
        query: &Query,
        classifications: Vec<DimensionResult>,
        generation: GenerationResult,
        reason: EscalationReason,
    ) -> Self {
        Self {
            idempotency_key: uuid::Uuid::new_v4().to_string(),
            subject: Self::subject_for(&query.text),
            query: query.text.clone(),
            classifications,
            generation,
            reason,
            created_at: Utc::now(),
        }
    }

    /// Single-line subject: first non-empty line of the query, truncated.
    pub fn subject_for(query: &str) -> String {
        let line = query.lines().map(str::trim).find(|l| !l.is_empty());
        match line {
            Some(l) => l.chars().take(SUBJECT_MAX_LEN).collect(),
            None => DEFAULT_SUBJECT.to_string(),
        }
    }
}

// ── WorkflowResult ───────────────────────────────────────────────────────────

/// The full record a workflow run returns to its caller.
///
/// Constructed once per run and never mutated after return. Branch-level
/// failures show up as `Unavailable` / `Refused` values, never as missing
/// fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub query: Query,
    pub context: ContextSet,
    pub generation: GenerationResult,
    /// One entry per dimension, in canonical order.
    pub classifications: Vec<DimensionResult>,
    pub escalation: EscalationDecision,
    /// Set when a ticket was durably created.
    pub ticket_id: Option<TicketId>,
    /// False when escalation was decided but the sink call failed; the
    /// caller can retry persistence independently.
    pub ticket_persisted: bool,
    /// Sink error message when `ticket_persisted` is false.
    pub persistence_error: Option<String>,
    /// Audit log of the state transitions this run took.
    pub transitions: Vec<TransitionRecord>,
}

impl WorkflowResult {
    /// The settled outcome for one classification dimension.
    pub fn classification(&self, dimension: Dimension) -> Option<&BranchResult<Classification>> {
        self.classifications
            .iter()
            .find(|c| c.dimension == dimension)
            .map(|c| &c.outcome)
    }

    fn label_wire(&self, dimension: Dimension, default: &'static str) -> &str {
        self.classification(dimension)
            .and_then(|o| o.as_ready())
            .map(|c| c.label.as_wire())
            .unwrap_or(default)
    }

    /// User-facing text for this run: the grounded answer, a ticket
    /// confirmation, or an insufficient-information notice with an
    /// escalation offer. Never a hallucinated answer with zero citations.
    pub fn user_message(&self) -> String {
        if let Some(id) = &self.ticket_id {
            return format!(
                "Ticket created\n\nID: {id}\nTopic: {topic}\nPriority: {priority}\n\n\
                 This ticket has been routed to the appropriate support team.",
                id = id,
                topic = self.label_wire(Dimension::Topic, "General"),
                priority = self.label_wire(Dimension::Priority, "P2"),
            );
        }
        if self.escalation.should_escalate {
            return "I don't have enough information to answer this from the \
                    documentation. Would you like me to create a support ticket \
                    so a human can follow up?"
                .to_string();
        }
        match &self.generation {
            GenerationResult::Answered { text, .. } => text.clone(),
            GenerationResult::Refused { .. } => {
                "I don't have enough information to answer this from the \
                 documentation. Would you like me to create a support ticket \
                 so a human can follow up?"
                    .to_string()
            }
        }
    }
}
