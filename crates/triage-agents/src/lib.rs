//! Support triage workflow engine.
//!
//! Routes an incoming support query through a directed workflow:
//! retrieval of grounding context, concurrent classification along
//! independent dimensions (topic, sentiment, priority), a grounded
//! generation step, and a confidence-gated escalation decision that may
//! persist a ticket for human handling.
//!
//! The engine is the orchestration core only. Vector search, the
//! classifier and answer models, and the ticket store are external
//! collaborators behind the port traits in [`ports`]; HTTP adapters for
//! them live in [`ports_http`], and any test double implementing the
//! traits slots in the same way.
//!
//! ```rust,ignore
//! use triage_agents::{Query, RunOptions, WorkflowConfig, WorkflowEngine};
//!
//! let engine = WorkflowEngine::new(retrieval, classifier, generator, tickets,
//!     WorkflowConfig::default());
//! let result = engine.run(Query::new("How do I set up SSO?"), RunOptions::default()).await?;
//! println!("{}", result.user_message());
//! ```

pub mod aggregate;
pub mod config;
pub mod domain;
pub mod errors;
pub mod orchestrator;
pub mod policy;
pub mod ports;
pub mod ports_http;
pub mod retry;
pub mod state_machine;

// Re-export the engine surface
pub use config::{PortEndpoints, WorkflowConfig};
pub use errors::WorkflowError;
pub use orchestrator::{RunOptions, WorkflowEngine};

// Re-export core value types
pub use domain::{
    BranchResult, Classification, ContextPassage, ContextSet, Dimension, DimensionResult,
    EscalationDecision, EscalationReason, GenerationResult, Label, PriorityLabel, Query,
    SentimentLabel, TicketDraft, TicketId, TopicLabel, WorkflowResult,
};

// Re-export port contracts and errors
pub use ports::{ClassificationPort, GenerationPort, PortError, RetrievalPort, TicketSink};

// Re-export policy and retry types
pub use aggregate::{aggregate, AggregateError, Aggregated};
pub use policy::{EscalationPolicy, EscalationSignals};
pub use retry::{call_with_retry, RateGate, RetryPolicy};
pub use state_machine::{StateMachine, TransitionRecord, WorkflowState};
