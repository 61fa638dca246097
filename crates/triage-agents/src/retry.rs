//! Bounded retry with exponential backoff, and the shared per-port rate
//! gate.
//!
//! One reusable policy object replaces scattered retry loops: every
//! external call goes through [`call_with_retry`], which applies the
//! per-call timeout, classifies failures via [`PortError::is_transient`],
//! backs off with jitter, and gives up once the attempt or total-wait
//! budget is spent.
//!
//! The [`RateGate`] sits in front of each port and is shared across
//! concurrent runs: a rate-limit signal from any run pauses admission for
//! all of them, so the fleet backs off together instead of amplifying
//! load.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ports::PortError;

/// Backoff parameters for one port.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first call. Minimum 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Ceiling for a single backoff delay.
    pub max_delay: Duration,
    /// Cap on the cumulative time spent sleeping between attempts.
    pub total_wait_cap: Duration,
    /// Jitter fraction in 0.0–1.0; each delay is scaled by a random
    /// factor in `[1 - jitter, 1 + jitter]`. Zero disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            total_wait_cap: Duration::from_secs(15),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the `attempt`-th failed call (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.as_millis() as u64;
        let raw_ms = base_ms.saturating_mul(1u64 << exp);
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as u64);
        if self.jitter <= 0.0 {
            return Duration::from_millis(capped_ms);
        }
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = 1.0 - jitter + 2.0 * jitter * rand::thread_rng().gen::<f64>();
        Duration::from_millis((capped_ms as f64 * factor).round() as u64)
    }
}

/// Shared admission gate in front of one external port.
///
/// Bounds in-flight concurrency with a semaphore and carries a shared
/// pause window: when any caller observes a rate-limit signal it extends
/// the window, and every caller waits it out before its next call.
pub struct RateGate {
    permits: Semaphore,
    pause_until: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Semaphore::new(max_concurrent.max(1)),
            pause_until: Mutex::new(None),
        }
    }

    /// Wait out any shared pause window, then acquire an in-flight permit.
    pub async fn admit(&self) -> SemaphorePermit<'_> {
        loop {
            match self.pause_remaining() {
                Some(wait) if !wait.is_zero() => tokio::time::sleep(wait).await,
                _ => break,
            }
        }
        match self.permits.acquire().await {
            Ok(permit) => permit,
            // The gate never closes its semaphore.
            Err(_) => unreachable!("rate gate semaphore closed"),
        }
    }

    /// Extend the shared pause window; shorter requests never shrink it.
    pub fn pause_for(&self, wait: Duration) {
        let until = Instant::now() + wait;
        let mut guard = match self.pause_until.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *guard {
            Some(existing) if existing >= until => {}
            _ => *guard = Some(until),
        }
    }

    fn pause_remaining(&self) -> Option<Duration> {
        let mut guard = match self.pause_until.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *guard {
            Some(until) => {
                let now = Instant::now();
                if until > now {
                    Some(until - now)
                } else {
                    *guard = None;
                    None
                }
            }
            None => None,
        }
    }
}

/// Run `op` with timeout, bounded backoff retry, and shared rate gating.
///
/// Transient failures (timeout, rate limit, malformed response) are
/// retried until the attempt count or the total-wait cap is exhausted;
/// the last error is then returned for the caller to degrade into an
/// explicit `Unavailable` value. Cancellation abandons any pending
/// backoff immediately.
pub async fn call_with_retry<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    gate: &RateGate,
    per_call_timeout: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, PortError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, PortError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut waited = Duration::ZERO;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if cancel.is_cancelled() {
            return Err(PortError::unavailable("cancelled"));
        }

        let permit = tokio::select! {
            permit = gate.admit() => permit,
            _ = cancel.cancelled() => return Err(PortError::unavailable("cancelled")),
        };

        let outcome = tokio::time::timeout(per_call_timeout, op()).await;
        drop(permit);

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => PortError::Timeout,
        };

        if !err.is_transient() || attempt >= max_attempts {
            return Err(err);
        }

        // A rate-limit signal pauses the shared gate, not just this call.
        if let PortError::RateLimited { retry_after } = &err {
            gate.pause_for(retry_after.unwrap_or(policy.base_delay));
        }

        let delay = policy.backoff_delay(attempt);
        if waited + delay > policy.total_wait_cap {
            return Err(err);
        }
        waited += delay;

        tracing::warn!(
            call = name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, backing off"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(PortError::unavailable("cancelled")),
        }
    }
}
