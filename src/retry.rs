// =============================================================================
// RetryEnvelope — bounded exponential backoff with circuit-breaker state
// =============================================================================
//
// Wraps any fallible external call (adapter fetch) with retry + breaker
// semantics. The breaker state is the only mutable shared state in the
// concurrency model (§5) and is updated with a single `parking_lot::Mutex`
// per endpoint, mirroring the atomic-counter discipline in
// `binance/rate_limit.rs` — one writer section per transition, no
// interleaved reads of a half-updated state.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::errors::AdapterError;

/// Configuration for a `RetryEnvelope`. All fields have the defaults named
/// in §6.4.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub per_call_timeout: Duration,
    pub circuit_breaker_failures: u32,
    pub circuit_breaker_cooldown: Duration,
    /// Add up to +/-`jitter_fraction` of the computed delay, chosen per
    /// retry. Defaults to 0.2 (20%).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            per_call_timeout: Duration::from_secs(10),
            circuit_breaker_failures: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
            jitter_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-endpoint circuit breaker. CLOSED lets calls through and counts
/// terminal-or-exhausted failures; after `circuit_breaker_failures`
/// consecutive failures it OPENs for `circuit_breaker_cooldown`; the next
/// call after cooldown is let through HALF-OPEN, and a single success closes
/// the breaker again.
struct Breaker {
    endpoint: String,
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl Breaker {
    fn new(endpoint: String, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            endpoint,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold,
            cooldown,
        }
    }

    /// Returns `Err(CircuitOpen)` if the caller should fast-fail, otherwise
    /// `Ok(())` (possibly after transitioning OPEN -> HALF-OPEN).
    fn check(&self) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    info!(endpoint = %self.endpoint, "circuit breaker cooldown elapsed, moving to half-open");
                    inner.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(AdapterError::CircuitOpen {
                        endpoint: self.endpoint.clone(),
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!(endpoint = %self.endpoint, "circuit breaker closing after success");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.state == BreakerState::HalfOpen || inner.consecutive_failures >= self.failure_threshold {
            if inner.state != BreakerState::Open {
                warn!(
                    endpoint = %self.endpoint,
                    consecutive_failures = inner.consecutive_failures,
                    "circuit breaker opening"
                );
            }
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

/// A reusable retry envelope, parameterized by endpoint name. One instance
/// per adapter endpoint (e.g. one per `NewsAdapter::fetch`, one per
/// `QuoteAdapter::get_premarket_quote`) so each gets its own breaker.
pub struct RetryEnvelope {
    config: RetryConfig,
    breaker: Arc<Breaker>,
}

impl RetryEnvelope {
    pub fn new(endpoint: impl Into<String>, config: RetryConfig) -> Self {
        let endpoint = endpoint.into();
        Self {
            breaker: Arc::new(Breaker::new(
                endpoint,
                config.circuit_breaker_failures,
                config.circuit_breaker_cooldown,
            )),
            config,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let scaled = base * self.config.backoff_factor.powi(attempt as i32 - 1);
        let jitter = if self.config.jitter_fraction > 0.0 {
            let mut rng = rand::thread_rng();
            let spread = scaled * self.config.jitter_fraction;
            rng.gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((scaled + jitter).max(0.0))
    }

    /// Run `attempt_fn` under the breaker + retry policy. `attempt_fn` is
    /// called at most `max_attempts` times; between attempts the envelope
    /// sleeps `base * factor^(attempt-1)` (with jitter), bounded by the
    /// per-call timeout on each individual attempt. A retryable error that
    /// survives every attempt becomes `AdapterError::Exhausted`; a terminal
    /// error is never retried and propagates immediately.
    pub async fn run<F, Fut, T>(&self, mut attempt_fn: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AdapterError>>,
    {
        self.breaker.check()?;

        let mut last_error: Option<AdapterError> = None;

        for attempt in 1..=self.config.max_attempts {
            let call = attempt_fn();
            let outcome = tokio::time::timeout(self.config.per_call_timeout, call).await;

            let result = match outcome {
                Ok(r) => r,
                Err(_) => Err(AdapterError::Timeout(self.config.per_call_timeout)),
            };

            match result {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(attempt, "terminal adapter error, not retrying");
                    self.breaker.record_failure();
                    return Err(err);
                }
                Err(err) => {
                    warn!(attempt, max_attempts = self.config.max_attempts, error = %err, "retryable adapter error");
                    last_error = Some(err);
                    if attempt < self.config.max_attempts {
                        let delay = self.delay_for_attempt(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.breaker.record_failure();
        Err(AdapterError::Exhausted {
            attempts: self.config.max_attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            per_call_timeout: Duration::from_millis(50),
            circuit_breaker_failures: 2,
            circuit_breaker_cooldown: Duration::from_millis(20),
            jitter_fraction: 0.0,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let envelope = RetryEnvelope::new("test", fast_config());
        let result: Result<i32, AdapterError> =
            envelope.run(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let envelope = RetryEnvelope::new("test", fast_config());
        let calls = AtomicU32::new(0);
        let result = envelope
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 1 {
                    Err(AdapterError::Transient("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn terminal_error_is_never_retried() {
        let envelope = RetryEnvelope::new("test", fast_config());
        let calls = AtomicU32::new(0);
        let result: Result<i32, AdapterError> = envelope
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Terminal("bad auth".into()))
            })
            .await;
        assert!(matches!(result, Err(AdapterError::Terminal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let envelope = RetryEnvelope::new("test", fast_config());
        let calls = AtomicU32::new(0);
        let result: Result<i32, AdapterError> = envelope
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Transient("always fails".into()))
            })
            .await;
        assert!(matches!(result, Err(AdapterError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures_then_fast_fails() {
        let envelope = RetryEnvelope::new("test", fast_config());

        // First exhausted call trips 1 failure record (threshold is 2 in
        // fast_config, but retry exhaustion itself records one failure).
        for _ in 0..2 {
            let _: Result<i32, AdapterError> = envelope
                .run(|| async { Err(AdapterError::Transient("down".into())) })
                .await;
        }

        let result: Result<i32, AdapterError> =
            envelope.run(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(AdapterError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn circuit_half_opens_after_cooldown_and_closes_on_success() {
        let envelope = RetryEnvelope::new("test", fast_config());
        for _ in 0..2 {
            let _: Result<i32, AdapterError> = envelope
                .run(|| async { Err(AdapterError::Transient("down".into())) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let result = envelope.run(|| async { Ok(99) }).await;
        assert_eq!(result.unwrap(), 99);

        // Breaker closed again: a subsequent failing call should still get
        // a full retry budget rather than an immediate CircuitOpen.
        let calls = AtomicU32::new(0);
        let _: Result<i32, AdapterError> = envelope
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Transient("down again".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
