//! Retry utilities with bounded backoff for resilient API calls.
//!
//! Dataset repositories are polled in bulk, so adapters retry a transient
//! failure at most once before reporting the source as unavailable.

use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::sources::SourceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum time for a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following `attempt` (1-based)
    fn delay_after(&self, attempt: u32, transient: &TransientError) -> Duration {
        let exp = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powf(attempt.saturating_sub(1) as f64);
        let delay = Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()));
        std::cmp::max(delay, transient.recommended_delay()).min(self.max_delay)
    }
}

/// Transient errors that should trigger a retry
#[derive(Debug, Clone, PartialEq)]
pub enum TransientError {
    /// Network connectivity issues
    Network,
    /// Rate limit exceeded
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Request timeout
    Timeout,
}

impl TransientError {
    /// Check if a SourceError represents a transient error
    pub fn from_source_error(err: &SourceError) -> Option<Self> {
        match err {
            SourceError::RateLimit => Some(TransientError::RateLimit),
            SourceError::Unavailable(msg) => {
                if msg.to_lowercase().contains("timed out") {
                    Some(TransientError::Timeout)
                } else {
                    Some(TransientError::Network)
                }
            }
            SourceError::Status { status, .. } if *status >= 500 => {
                Some(TransientError::ServerError)
            }
            _ => None,
        }
    }

    /// Get the recommended delay for this error
    pub fn recommended_delay(&self) -> Duration {
        match self {
            TransientError::RateLimit => Duration::from_secs(10),
            TransientError::ServerError => Duration::from_secs(2),
            TransientError::Timeout => Duration::from_secs(2),
            TransientError::Network => Duration::from_secs(1),
        }
    }
}

/// Execute an async operation with retry logic
///
/// Permanent errors are returned immediately. Transient ones are retried
/// until `max_attempts` is reached, sleeping a bounded backoff in between.
pub async fn with_retry<T, F, Fut>(config: RetryConfig, operation: F) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SourceError>>,
{
    let mut attempts = 0;
    let mut operation = operation;

    loop {
        attempts += 1;

        let error = match timeout(config.attempt_timeout, operation()).await {
            Ok(Ok(result)) => {
                if attempts > 1 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} transient failures",
                        attempts,
                        attempts - 1
                    );
                }
                return Ok(result);
            }
            Ok(Err(error)) => error,
            Err(_) => SourceError::Unavailable("operation timed out".to_string()),
        };

        let Some(transient) = TransientError::from_source_error(&error) else {
            return Err(error);
        };

        if attempts >= config.max_attempts {
            tracing::warn!("Operation failed after {} attempts: {}", attempts, error);
            return Err(error);
        }

        let delay = config.delay_after(attempts, &transient);
        tracing::debug!(
            "Transient error on attempt {}: {:?}, retrying in {:?}",
            attempts,
            transient,
            delay
        );
        sleep(delay).await;
    }
}

/// Default retry configuration for the dataset APIs: one bounded backoff
pub fn api_retry_config() -> RetryConfig {
    RetryConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_try() {
        let call_count = Rc::new(RefCell::new(0));

        let result = {
            let call_count = call_count.clone();
            with_retry(fast_config(2), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Ok("success")
                }
            })
        }
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(*call_count.borrow(), 1);
    }

    #[tokio::test]
    async fn test_single_retry_then_success() {
        let call_count = Rc::new(RefCell::new(0));

        let result = {
            let call_count = call_count.clone();
            with_retry(fast_config(2), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    if *call_count.borrow() < 2 {
                        Err(SourceError::Unavailable("connection reset".to_string()))
                    } else {
                        Ok("success")
                    }
                }
            })
        }
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(*call_count.borrow(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_one_retry() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<&str, SourceError> = {
            let call_count = call_count.clone();
            with_retry(fast_config(2), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Err(SourceError::Status {
                        status: 503,
                        message: "service unavailable".to_string(),
                    })
                }
            })
        }
        .await;

        assert!(matches!(result, Err(SourceError::Status { status: 503, .. })));
        assert_eq!(*call_count.borrow(), 2);
    }

    #[tokio::test]
    async fn test_retry_returns_permanent_error() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<&str, SourceError> = {
            let call_count = call_count.clone();
            with_retry(fast_config(5), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Err(SourceError::MalformedResponse("bad json".to_string()))
                }
            })
        }
        .await;

        assert!(matches!(result, Err(SourceError::MalformedResponse(_))));
        assert_eq!(*call_count.borrow(), 1);
    }

    #[test]
    fn test_transient_error_detection() {
        assert_eq!(
            TransientError::from_source_error(&SourceError::RateLimit),
            Some(TransientError::RateLimit)
        );
        assert!(TransientError::from_source_error(&SourceError::Unavailable(
            "connection refused".to_string()
        ))
        .is_some());
        assert!(TransientError::from_source_error(&SourceError::Status {
            status: 404,
            message: "not found".to_string()
        })
        .is_none());
        assert!(
            TransientError::from_source_error(&SourceError::NotFound("x".to_string())).is_none()
        );
    }

    #[test]
    fn test_delay_is_bounded() {
        let config = fast_config(2);
        assert_eq!(
            config.delay_after(1, &TransientError::RateLimit),
            Duration::from_millis(20)
        );
        assert_eq!(api_retry_config().max_attempts, 2);
    }
}
