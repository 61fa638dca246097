//! Escalation policy — the Deciding step.
//!
//! Escalates when any trigger condition holds, and records the reason as
//! the first matching condition in a fixed priority order. Thresholds and
//! the dissatisfaction signal are policy inputs, not constants.

use serde::{Deserialize, Serialize};

use crate::domain::{
    ContextSet, DimensionResult, EscalationDecision, EscalationReason, GenerationResult,
};

/// Caller-supplied signals that feed the decision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EscalationSignals {
    /// The caller flagged that a prior answer did not help.
    pub user_dissatisfied: bool,
}

/// Configurable policy applied after aggregation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Minimum acceptable classification confidence. `None` disables the
    /// gate. When set, an unavailable classification branch also trips it
    /// (no confidence is below any minimum). Classifications that report
    /// no confidence pass.
    pub min_confidence: Option<f64>,
}

impl EscalationPolicy {
    /// Evaluate trigger conditions in fixed priority order:
    /// 1. context absent
    /// 2. generation refused
    /// 3. answered with zero citations (a refusal by policy)
    /// 4. caller dissatisfaction
    /// 5. classification confidence below the configured minimum
    pub fn decide(
        &self,
        context: &ContextSet,
        generation: &GenerationResult,
        classifications: &[DimensionResult],
        signals: EscalationSignals,
    ) -> EscalationDecision {
        if context.is_empty() {
            return EscalationDecision::escalate(EscalationReason::NoContext);
        }
        if generation.is_refused() {
            return EscalationDecision::escalate(EscalationReason::Refused);
        }
        if generation.cited_count() == 0 {
            return EscalationDecision::escalate(EscalationReason::Refused);
        }
        if signals.user_dissatisfied {
            return EscalationDecision::escalate(EscalationReason::UserDissatisfied);
        }
        if let Some(min) = self.min_confidence {
            let below_minimum = classifications.iter().any(|c| match &c.outcome {
                crate::domain::BranchResult::Ready(cls) => {
                    cls.confidence.is_some_and(|conf| conf < min)
                }
                crate::domain::BranchResult::Unavailable(_) => true,
            });
            if below_minimum {
                return EscalationDecision::escalate(EscalationReason::LowConfidence);
            }
        }
        EscalationDecision::stay()
    }
}
