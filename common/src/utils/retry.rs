use std::{future::Future, time::Duration};

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};

use crate::error::AppError;

/// Bounded exponential backoff for calls to external providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Three attempts, 2s doubling up to 10s.
    pub const fn standard() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Two attempts, 1s then up to 5s.
    pub const fn image_provider() -> Self {
        Self {
            attempts: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }

    /// No waiting between attempts.
    pub const fn immediate(attempts: usize) -> Self {
        Self {
            attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn strategy(&self) -> impl Iterator<Item = Duration> {
        let factor = u64::try_from(self.initial_delay.as_millis() / 2).unwrap_or(u64::MAX);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.attempts.saturating_sub(1))
    }
}

/// Run `action`, repeating it while it fails with a transient error.
pub async fn retry_transient<T, A, Fut>(policy: RetryPolicy, action: A) -> Result<T, AppError>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    RetryIf::spawn(policy.strategy(), action, |err: &AppError| err.is_transient()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn transient_errors_are_retried_up_to_the_ceiling() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AppError> = retry_transient(RetryPolicy::immediate(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Provider("503".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AppError> = retry_transient(RetryPolicy::immediate(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::LLMParsing("garbage".into())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::LLMParsing(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failure() {
        let calls = AtomicUsize::new(0);
        let result = retry_transient(RetryPolicy::immediate(2), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(AppError::Provider("timeout".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some("ok"));
    }
}
