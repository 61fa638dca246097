//! Port traits the orchestrator calls, and their shared error taxonomy.
//!
//! Each port is a contract over an external collaborator (vector search,
//! classifier model, answer model, ticket store). The orchestrator only
//! ever sees these traits, so any implementation — HTTP adapter or test
//! double — slots in without touching workflow logic.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    Classification, ContextPassage, ContextSet, Dimension, GenerationResult, TicketDraft, TicketId,
};

/// Failure modes of an external port call.
///
/// Callers branch on [`PortError::is_transient`] instead of string
/// matching. Malformed responses (e.g. a label outside a dimension's fixed
/// set) count as transient: the backend may produce a valid response on
/// retry, and they must never crash the run.
#[derive(Debug, Error)]
pub enum PortError {
    /// The call exceeded its per-call timeout.
    #[error("call timed out")]
    Timeout,

    /// The backend signalled rate limiting.
    #[error("rate limited")]
    RateLimited {
        /// Backend-suggested wait before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The backend answered with something outside its contract.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The backend is down or unreachable — no point retrying now.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl PortError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse(reason.into())
    }

    /// Whether the retry policy should attempt this call again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited { .. } | Self::MalformedResponse(_)
        )
    }
}

/// Top-k similarity search over the knowledge corpus.
///
/// Must be idempotent and side-effect-free; results come back ranked
/// descending by score.
#[async_trait]
pub trait RetrievalPort: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ContextPassage>, PortError>;
}

/// Single-dimension classification of a piece of text.
///
/// Each call is independent and side-effect-free; the returned label must
/// belong to the dimension's fixed set.
#[async_trait]
pub trait ClassificationPort: Send + Sync {
    async fn classify(&self, text: &str, dimension: Dimension)
        -> Result<Classification, PortError>;
}

/// Grounded answer generation over a supplied context set.
///
/// Implementations must only cite passage identifiers present in
/// `context`; the orchestrator treats a violation as malformed.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        context: &ContextSet,
    ) -> Result<GenerationResult, PortError>;
}

/// Durable persistence of escalated tickets.
///
/// The draft carries a caller-generated idempotency key, so a sink may be
/// called more than once per escalation decision without duplicating the
/// ticket.
#[async_trait]
pub trait TicketSink: Send + Sync {
    async fn create_ticket(&self, draft: &TicketDraft) -> Result<TicketId, PortError>;
}
