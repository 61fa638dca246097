//! Run-level error taxonomy.
//!
//! Branch-local failures never surface here — they degrade into explicit
//! `Unavailable` / `Refused` values inside the returned record. A run only
//! fails outright for bad input, caller cancellation, or a broken
//! invariant inside the engine itself.

use thiserror::Error;

/// Errors that abort a workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The query was empty or whitespace-only. Rejected before any
    /// external call is made.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller aborted the run; outstanding branches were told to stop
    /// and no partial record is returned.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A broken invariant inside the engine (e.g. an illegal state
    /// transition or a bad aggregation call). Programmer error, not a
    /// service failure.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }
}
