//! Workflow state machine — explicit states and legal transition guards.
//!
//! The orchestrator calls `advance()` to move between states. Each call
//! validates that the transition is legal and records it in the transition
//! log, so every run leaves an auditable trail and an illegal step is an
//! error rather than a silent ordering bug.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of workflow states.
///
/// Every run starts at `Started` and terminates at `Completed`, `Failed`,
/// or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Input accepted, nothing called yet.
    Started,
    /// Fetching grounding context from the retrieval port.
    Retrieving,
    /// Generation and classification branches in flight concurrently.
    Branching,
    /// Merging settled branch outputs into one record.
    Aggregating,
    /// Applying the escalation policy.
    Deciding,
    /// Persisting a ticket through the sink.
    Escalating,
    /// Run finished with a full result — terminal state.
    Completed,
    /// Unrecoverable error — terminal state.
    Failed,
    /// Caller aborted the run — terminal state.
    Cancelled,
}

impl WorkflowState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "Started"),
            Self::Retrieving => write!(f, "Retrieving"),
            Self::Branching => write!(f, "Branching"),
            Self::Aggregating => write!(f, "Aggregating"),
            Self::Deciding => write!(f, "Deciding"),
            Self::Escalating => write!(f, "Escalating"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Legal transitions between workflow states.
///
/// ```text
/// Started → Retrieving
/// Retrieving → Branching
/// Branching → Aggregating
/// Aggregating → Deciding
/// Deciding → Escalating | Completed
/// Escalating → Completed
/// any non-terminal → Failed | Cancelled
/// ```
fn is_legal_transition(from: WorkflowState, to: WorkflowState) -> bool {
    use WorkflowState::*;

    // Any non-terminal state can fail or be cancelled.
    if matches!(to, Failed | Cancelled) && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Started, Retrieving)
            | (Retrieving, Branching)
            | (Branching, Aggregating)
            | (Aggregating, Deciding)
            // Deciding either escalates or completes directly
            | (Deciding, Escalating)
            | (Deciding, Completed)
            | (Escalating, Completed)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    /// Milliseconds since the run began.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal state transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state, enforces legal transitions, and keeps a full
/// log of the transitions a run took.
pub struct StateMachine {
    current: WorkflowState,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine at `Started`.
    pub fn new() -> Self {
        Self {
            current: WorkflowState::Started,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> WorkflowState {
        self.current
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: WorkflowState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(from = %self.current, to = %to, "state transition");

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` — always legal from non-terminal states.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(WorkflowState::Failed, Some(reason))
    }

    /// Transition to `Cancelled` — always legal from non-terminal states.
    pub fn cancel(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(WorkflowState::Cancelled, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Consume the machine and return its transition log.
    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
