//! Retry policy shared by all model adapters
//!
//! - `Transient`: retried with exponential backoff until `max_attempts`
//! - `Parse`: retried `parse_retries` times (still bounded by `max_attempts`)
//! - `Permanent`: never retried

use crate::error::AdapterError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use vigil_common::{Error, Result};

/// Bounded exponential backoff with a retryable-error predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Extra attempts granted after a parse failure
    pub parse_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            parse_retries: 1,
        }
    }
}

/// Final result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: std::result::Result<T, AdapterError>,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy with no backoff delay, for tests and dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be >= 1".to_string()));
        }
        if !(self.multiplier >= 1.0) {
            return Err(Error::Config("retry.multiplier must be >= 1.0".to_string()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    /// Whether another attempt should follow this error
    ///
    /// `attempt` is the number of attempts made so far; `parse_failures`
    /// counts parse errors among them (this one included).
    pub fn should_retry(&self, error: &AdapterError, attempt: u32, parse_failures: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match error {
            AdapterError::Transient(_) => true,
            AdapterError::Parse { .. } => parse_failures <= self.parse_retries,
            AdapterError::Permanent(_) => false,
        }
    }

    /// Run `operation` under this policy
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, AdapterError>>,
    {
        let mut attempt = 0u32;
        let mut parse_failures = 0u32;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "Succeeded after retry");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    if matches!(err, AdapterError::Parse { .. }) {
                        parse_failures += 1;
                    }

                    if !self.should_retry(&err, attempt, parse_failures) {
                        return RetryOutcome {
                            result: Err(err),
                            attempts: attempt,
                        };
                    }

                    let delay = self.backoff_delay(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error_kind = err.kind(),
                        backoff_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_curve_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn test_retry_predicate() {
        let policy = RetryPolicy::default();
        let transient = AdapterError::Transient("timeout".into());
        let permanent = AdapterError::Permanent("unsupported".into());
        let parse = AdapterError::parse("bad json", "{");

        assert!(policy.should_retry(&transient, 1, 0));
        assert!(policy.should_retry(&transient, 2, 0));
        assert!(!policy.should_retry(&transient, 3, 0));
        assert!(!policy.should_retry(&permanent, 1, 0));
        assert!(policy.should_retry(&parse, 1, 1));
        assert!(!policy.should_retry(&parse, 2, 2));
    }

    #[tokio::test]
    async fn test_transient_retried_to_cap() {
        let policy = RetryPolicy::immediate(3);
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = policy
            .execute("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::Transient("connection refused".into())) }
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(outcome.result, Err(AdapterError::Transient(_))));
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let policy = RetryPolicy::immediate(5);
        let outcome: RetryOutcome<()> = policy
            .execute("test", |_| async { Err(AdapterError::Permanent("model not found".into())) })
            .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_parse_retried_once_then_fails_with_raw_output() {
        let policy = RetryPolicy::immediate(5);
        let outcome: RetryOutcome<()> = policy
            .execute("test", |attempt| async move {
                Err(AdapterError::parse("no JSON object", format!("garbage #{}", attempt)))
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        match outcome.result {
            Err(err) => assert_eq!(err.raw_output(), Some("garbage #2")),
            Ok(_) => panic!("expected parse failure"),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient() {
        let policy = RetryPolicy::immediate(3);
        let outcome = policy
            .execute("test", |attempt| async move {
                if attempt == 1 {
                    Err(AdapterError::Transient("503".into()))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::immediate(0).validate().is_err());
        let bad = RetryPolicy {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
