//! The workflow engine: drives one query through the triage state machine.
//!
//! One run is a single coordinating task that fans out to the generation
//! branch and one classification branch per dimension, then joins on all
//! of them — never first-to-finish. Branches share no mutable state; each
//! settles to an independent value that is merged only after every branch
//! reaches a terminal state.
//!
//! ```text
//! run(query)
//!   → Retrieving      retrieval port, allow-list filter, top-k
//!   → Branching       generate ∥ classify(topic) ∥ classify(sentiment) ∥ classify(priority)
//!   → Aggregating     pure merge, canonical dimension order
//!   → Deciding        escalation policy, fixed reason priority
//!   → Escalating      ticket sink (only when escalating)
//!   → Completed
//! ```

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregate::aggregate;
use crate::config::WorkflowConfig;
use crate::domain::{
    BranchResult, Classification, ContextPassage, ContextSet, Dimension, EscalationReason,
    GenerationResult, Query, TicketDraft, TicketId, WorkflowResult, NO_CONTEXT,
};
use crate::errors::WorkflowError;
use crate::ports::{ClassificationPort, GenerationPort, PortError, RetrievalPort, TicketSink};
use crate::policy::EscalationSignals;
use crate::retry::{call_with_retry, RateGate};
use crate::state_machine::{StateMachine, WorkflowState};

/// Reason recorded when the run deadline cuts a branch off.
const DEADLINE_REASON: &str = "run deadline exceeded";

/// Per-run inputs beyond the query itself.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Caller-side escalation signals (e.g. dissatisfaction with a prior
    /// answer in the same session).
    pub signals: EscalationSignals,
    /// Cancellation signal; cancelling aborts outstanding retries and the
    /// run returns `Err(Cancelled)` with no partial record.
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn dissatisfied() -> Self {
        Self {
            signals: EscalationSignals {
                user_dissatisfied: true,
            },
            ..Self::default()
        }
    }
}

/// Sequences the ports into the triage workflow and owns all in-flight
/// run state. Port instances are injected at construction, so any
/// implementation — live adapter or test double — works unchanged.
pub struct WorkflowEngine {
    retrieval: Arc<dyn RetrievalPort>,
    classification: Arc<dyn ClassificationPort>,
    generation: Arc<dyn GenerationPort>,
    tickets: Arc<dyn TicketSink>,
    config: WorkflowConfig,
    retrieval_gate: RateGate,
    classify_gate: RateGate,
    generate_gate: RateGate,
    ticket_gate: RateGate,
}

impl WorkflowEngine {
    pub fn new(
        retrieval: Arc<dyn RetrievalPort>,
        classification: Arc<dyn ClassificationPort>,
        generation: Arc<dyn GenerationPort>,
        tickets: Arc<dyn TicketSink>,
        config: WorkflowConfig,
    ) -> Self {
        let concurrency = config.port_concurrency;
        Self {
            retrieval,
            classification,
            generation,
            tickets,
            config,
            retrieval_gate: RateGate::new(concurrency),
            classify_gate: RateGate::new(concurrency),
            generate_gate: RateGate::new(concurrency),
            ticket_gate: RateGate::new(concurrency),
        }
    }

    /// Run one query through the full workflow.
    ///
    /// Always produces a complete [`WorkflowResult`] for recoverable
    /// failures; only bad input and cancellation surface as `Err`.
    pub async fn run(
        &self,
        query: Query,
        opts: RunOptions,
    ) -> Result<WorkflowResult, WorkflowError> {
        if query.is_blank() {
            return Err(WorkflowError::invalid_input(
                "query is empty or whitespace-only",
            ));
        }

        let cancel = opts.cancel.clone();
        let mut sm = StateMachine::new();
        let deadline = Instant::now() + self.config.run_deadline;

        tracing::info!(session = ?query.session_id, "workflow run starting");

        advance(&mut sm, WorkflowState::Retrieving, None)?;
        let context = self.retrieve_context(&query.text, deadline, &cancel).await;
        ensure_live(&mut sm, &cancel)?;

        advance(
            &mut sm,
            WorkflowState::Branching,
            Some(if context.is_empty() {
                "context absent, generation skipped"
            } else {
                "generation and classification in flight"
            }),
        )?;
        let (generation, topic, sentiment, priority) = tokio::join!(
            self.generation_branch(&query.text, &context, deadline, &cancel),
            self.classification_branch(Dimension::Topic, &query.text, deadline, &cancel),
            self.classification_branch(Dimension::Sentiment, &query.text, deadline, &cancel),
            self.classification_branch(Dimension::Priority, &query.text, deadline, &cancel),
        );
        ensure_live(&mut sm, &cancel)?;

        advance(&mut sm, WorkflowState::Aggregating, None)?;
        let merged = match aggregate(generation, vec![topic, sentiment, priority]) {
            Ok(merged) => merged,
            Err(e) => {
                let _ = sm.fail(&e.to_string());
                return Err(WorkflowError::Internal(anyhow::anyhow!(e)));
            }
        };

        advance(&mut sm, WorkflowState::Deciding, None)?;
        let decision = self.config.escalation.decide(
            &context,
            &merged.generation,
            &merged.classifications,
            opts.signals,
        );

        let mut ticket_id: Option<TicketId> = None;
        let mut ticket_persisted = true;
        let mut persistence_error = None;

        if decision.should_escalate {
            let reason = decision.reason.unwrap_or(EscalationReason::Refused);
            advance(&mut sm, WorkflowState::Escalating, Some(&reason.to_string()))?;
            let draft = TicketDraft::new(
                &query,
                merged.classifications.clone(),
                merged.generation.clone(),
                reason,
            );
            match self.persist_ticket(&draft, deadline, &cancel).await {
                Ok(id) => {
                    tracing::info!(ticket = %id, reason = %reason, "ticket created");
                    ticket_id = Some(id);
                }
                Err(e) => {
                    // The computed answer and classifications are kept; the
                    // caller can retry persistence with the same draft.
                    tracing::warn!(error = %e, "ticket sink failed, returning unpersisted result");
                    ticket_persisted = false;
                    persistence_error = Some(e.to_string());
                }
            }
            ensure_live(&mut sm, &cancel)?;
        }

        advance(&mut sm, WorkflowState::Completed, None)?;
        tracing::info!(
            escalated = decision.should_escalate,
            passages = context.len(),
            "workflow run completed"
        );

        Ok(WorkflowResult {
            query,
            context,
            generation: merged.generation,
            classifications: merged.classifications,
            escalation: decision,
            ticket_id,
            ticket_persisted,
            persistence_error,
            transitions: sm.into_transitions(),
        })
    }

    /// Retrieval step. An unavailable retrieval degrades to absent
    /// context rather than failing the run; downstream policy then
    /// escalates with `NoContext`.
    async fn retrieve_context(
        &self,
        query: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ContextSet {
        let port = Arc::clone(&self.retrieval);
        let text = query.to_string();
        let k = self.config.top_k;
        let fut = call_with_retry(
            "retrieval.search",
            &self.config.retry,
            &self.retrieval_gate,
            self.config.per_call_timeout,
            cancel,
            move || {
                let port = Arc::clone(&port);
                let text = text.clone();
                async move { port.search(&text, k).await }
            },
        );

        let passages = match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(passages)) => passages,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "retrieval unavailable, treating context as absent");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("run deadline hit during retrieval, treating context as absent");
                Vec::new()
            }
        };

        ContextSet::from_ranked(self.filter_allowed(passages), k)
    }

    /// Drop passages whose source domain is not on the allow-list.
    fn filter_allowed(&self, passages: Vec<ContextPassage>) -> Vec<ContextPassage> {
        if self.config.allowed_domains.is_empty() {
            return passages;
        }
        passages
            .into_iter()
            .filter(|p| {
                let allowed = source_domain(&p.source_url).is_some_and(|host| {
                    self.config
                        .allowed_domains
                        .iter()
                        .any(|d| host == d || host.ends_with(&format!(".{d}")))
                });
                if !allowed {
                    tracing::debug!(url = %p.source_url, "dropped passage from disallowed domain");
                }
                allowed
            })
            .collect()
    }

    /// Generation branch. With absent context the port is never invoked —
    /// a refusal is synthesized directly so no answer can be hallucinated
    /// from nothing.
    async fn generation_branch(
        &self,
        query: &str,
        context: &ContextSet,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> BranchResult<GenerationResult> {
        if context.is_empty() {
            return BranchResult::Ready(GenerationResult::refused(NO_CONTEXT));
        }

        let port = Arc::clone(&self.generation);
        let text = query.to_string();
        let ctx = context.clone();
        let fut = call_with_retry(
            "generation.generate",
            &self.config.retry,
            &self.generate_gate,
            self.config.per_call_timeout,
            cancel,
            move || {
                let port = Arc::clone(&port);
                let text = text.clone();
                let ctx = ctx.clone();
                async move {
                    let result = port.generate(&text, &ctx).await?;
                    if let GenerationResult::Answered { cited_ids, .. } = &result {
                        if let Some(bad) = cited_ids.iter().find(|id| !ctx.contains_id(id)) {
                            return Err(PortError::malformed(format!(
                                "cited passage id '{bad}' not in supplied context"
                            )));
                        }
                    }
                    Ok(result)
                }
            },
        );

        match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(result)) => BranchResult::Ready(result),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "generation branch degraded");
                BranchResult::unavailable(e.to_string())
            }
            Err(_) => BranchResult::unavailable(DEADLINE_REASON),
        }
    }

    /// One classification branch. Settles to `Unavailable` on retry
    /// exhaustion or deadline expiry; siblings are unaffected.
    async fn classification_branch(
        &self,
        dimension: Dimension,
        query: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> (Dimension, BranchResult<Classification>) {
        let port = Arc::clone(&self.classification);
        let text = query.to_string();
        let fut = call_with_retry(
            "classification.classify",
            &self.config.retry,
            &self.classify_gate,
            self.config.per_call_timeout,
            cancel,
            move || {
                let port = Arc::clone(&port);
                let text = text.clone();
                async move { port.classify(&text, dimension).await }
            },
        );

        let outcome = match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(classification)) => BranchResult::Ready(classification),
            Ok(Err(e)) => {
                tracing::warn!(dimension = %dimension, error = %e, "classification branch degraded");
                BranchResult::unavailable(e.to_string())
            }
            Err(_) => BranchResult::unavailable(DEADLINE_REASON),
        };
        (dimension, outcome)
    }

    /// Ticket persistence. Internal retries reuse the same draft, so the
    /// idempotency key keeps the sink from creating duplicates. Bounded by
    /// the run deadline like every other step; expiry surfaces as an
    /// unpersisted result, never a hung run.
    async fn persist_ticket(
        &self,
        draft: &TicketDraft,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<TicketId, PortError> {
        let port = Arc::clone(&self.tickets);
        let draft = draft.clone();
        let fut = call_with_retry(
            "tickets.create",
            &self.config.retry,
            &self.ticket_gate,
            self.config.per_call_timeout,
            cancel,
            move || {
                let port = Arc::clone(&port);
                let draft = draft.clone();
                async move { port.create_ticket(&draft).await }
            },
        );

        match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(PortError::unavailable(DEADLINE_REASON)),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }
}

fn advance(
    sm: &mut StateMachine,
    to: WorkflowState,
    reason: Option<&str>,
) -> Result<(), WorkflowError> {
    match sm.advance(to, reason) {
        Ok(()) => Ok(()),
        Err(e) => {
            // The transition log records the broken run as Failed.
            let _ = sm.fail(&e.to_string());
            Err(WorkflowError::Internal(anyhow::anyhow!(e)))
        }
    }
}

/// Stop everything on cancellation: mark the state machine and abort the
/// run with no partial record.
fn ensure_live(sm: &mut StateMachine, cancel: &CancellationToken) -> Result<(), WorkflowError> {
    if cancel.is_cancelled() {
        let _ = sm.cancel("caller cancelled");
        return Err(WorkflowError::cancelled("caller cancelled"));
    }
    Ok(())
}

/// Host portion of a source URL, without scheme, userinfo, port, or path.
fn source_domain(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}
