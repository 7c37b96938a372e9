//! Generic retry, circuit-breaking, and graceful-degradation helpers.
//!
//! These wrap any fallible async operation; activities and the AI provider
//! abstraction compose them rather than rolling their own backoff loops.

use crate::error::{PipelineError, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-external-dependency circuit breaker (one per AI provider / feed host).
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    failure_count: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
    last_failure_time: Option<std::time::Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            failure_threshold,
            recovery_timeout,
            last_failure_time: None,
        }
    }

    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                if let Some(last_failure) = self.last_failure_time {
                    if last_failure.elapsed() >= self.recovery_timeout {
                        self.state = CircuitBreakerState::HalfOpen;
                        info!("circuit breaker transitioning to half-open");
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            CircuitBreakerState::HalfOpen => true,
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitBreakerState::HalfOpen => {
                self.state = CircuitBreakerState::Closed;
                self.failure_count = 0;
                self.last_failure_time = None;
                info!("circuit breaker closed after recovery");
            }
            CircuitBreakerState::Closed => self.failure_count = 0,
            CircuitBreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(std::time::Instant::now());

        match self.state {
            CircuitBreakerState::Closed => {
                if self.failure_count >= self.failure_threshold {
                    self.state = CircuitBreakerState::Open;
                    warn!(
                        failure_count = self.failure_count,
                        threshold = self.failure_threshold,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitBreakerState::HalfOpen => {
                self.state = CircuitBreakerState::Open;
                warn!("circuit breaker reopened after failed recovery attempt");
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }
}

/// Retry an arbitrary fallible operation with exponential backoff, honoring
/// `PipelineError::retryable()` — non-retryable errors return immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.retryable() {
                    return Err(err);
                }
                let exhausted = attempt == config.max_attempts;
                if exhausted {
                    error!(operation = operation_name, attempt, error = %err, "exhausted retries");
                    last_error = Some(err);
                    break;
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "operation failed, retrying"
                );
                last_error = Some(err);
                sleep(delay).await;
                delay = std::cmp::min(
                    Duration::from_millis(
                        (delay.as_millis() as f64 * config.backoff_multiplier) as u64,
                    ),
                    config.max_delay,
                );
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PipelineError::Fatal(operation_name.to_string())))
}

/// Execute an operation behind a circuit breaker; rejects immediately when open.
pub async fn with_circuit_breaker<F, Fut, T>(
    circuit_breaker: &mut CircuitBreaker,
    operation: F,
    dependency_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    if !circuit_breaker.can_execute() {
        warn!(dependency = dependency_name, state = ?circuit_breaker.state(), "circuit open, rejecting");
        return Err(PipelineError::transient(
            dependency_name,
            "circuit breaker open",
        ));
    }

    match operation().await {
        Ok(result) => {
            circuit_breaker.record_success();
            Ok(result)
        }
        Err(err) => {
            circuit_breaker.record_failure();
            Err(err)
        }
    }
}

/// Run an operation, falling back to `fallback_value` (and logging) on error.
/// This is the mechanism every processor's "degrade to documented fallback"
/// rule compiles down to.
pub async fn with_graceful_degradation<F, Fut, T>(
    operation: F,
    fallback_value: T,
    feature_name: &str,
) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match operation().await {
        Ok(result) => result,
        Err(err) => {
            warn!(feature = feature_name, error = %err, "degrading to fallback");
            fallback_value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let config = RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(10));

        let result = retry_with_backoff(
            || {
                let counter = counter_clone.clone();
                async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(PipelineError::transient("test", "not yet"))
                    } else {
                        Ok("success")
                    }
                }
            },
            &config,
            "test_operation",
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_on_non_retryable() {
        let config = RetryConfig::default();
        let result: Result<&str> = retry_with_backoff(
            || async { Err(PipelineError::malformed("feed", "bad xml")) },
            &config,
            "test_operation",
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn circuit_breaker_state_machine() {
        let mut cb = CircuitBreaker::new(2, Duration::from_millis(50));
        assert_eq!(cb.state(), &CircuitBreakerState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), &CircuitBreakerState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), &CircuitBreakerState::Open);
        assert!(!cb.can_execute());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.can_execute());
        assert_eq!(cb.state(), &CircuitBreakerState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), &CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn graceful_degradation_falls_back() {
        let value = with_graceful_degradation(
            || async { Err(PipelineError::transient("ai", "timeout")) },
            42,
            "topics",
        )
        .await;
        assert_eq!(value, 42);
    }
}
