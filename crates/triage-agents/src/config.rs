//! Runtime configuration, resolved from `TRIAGE_*` environment variables
//! with hard-coded fallbacks.

use std::time::Duration;

use crate::policy::EscalationPolicy;
use crate::retry::RetryPolicy;

/// Engine knobs for a workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Maximum passages kept from retrieval.
    pub top_k: usize,
    /// Timeout applied to each individual external call.
    pub per_call_timeout: Duration,
    /// Overall deadline for one run; branches still pending when it
    /// expires settle as unavailable.
    pub run_deadline: Duration,
    /// Backoff policy shared by all ports.
    pub retry: RetryPolicy,
    /// Escalation thresholds.
    pub escalation: EscalationPolicy,
    /// Source domains retrieval results may come from. Empty = allow all.
    pub allowed_domains: Vec<String>,
    /// In-flight call cap per port, shared across concurrent runs.
    pub port_concurrency: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            top_k: env_usize("TRIAGE_TOP_K", 3),
            per_call_timeout: Duration::from_secs(env_u64("TRIAGE_CALL_TIMEOUT_SECS", 20)),
            run_deadline: Duration::from_secs(env_u64("TRIAGE_RUN_DEADLINE_SECS", 90)),
            retry: RetryPolicy {
                max_attempts: env_u64("TRIAGE_MAX_ATTEMPTS", 3) as u32,
                ..RetryPolicy::default()
            },
            escalation: EscalationPolicy {
                min_confidence: env_f64_opt("TRIAGE_MIN_CONFIDENCE"),
            },
            allowed_domains: env_list("TRIAGE_ALLOWED_DOMAINS"),
            port_concurrency: env_usize("TRIAGE_PORT_CONCURRENCY", 8),
        }
    }
}

/// Base URLs of the four external services.
#[derive(Debug, Clone)]
pub struct PortEndpoints {
    pub retrieval_url: String,
    pub classify_url: String,
    pub generate_url: String,
    pub ticket_url: String,
}

impl Default for PortEndpoints {
    fn default() -> Self {
        Self {
            retrieval_url: env_or("TRIAGE_RETRIEVAL_URL", "http://localhost:8001"),
            classify_url: env_or("TRIAGE_CLASSIFY_URL", "http://localhost:8002"),
            generate_url: env_or("TRIAGE_GENERATE_URL", "http://localhost:8003"),
            ticket_url: env_or("TRIAGE_TICKET_URL", "http://localhost:8004"),
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.into())
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64_opt(var: &str) -> Option<f64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn env_list(var: &str) -> Vec<String> {
    std::env::var(var)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
