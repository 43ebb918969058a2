use std::future::Future;
use std::time::Duration;

use super::error::GatewayResult;

/// Bounded retries with a fixed pause between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &crate::config::Payments) -> Self {
        Self::new(config.retry_attempts(), config.retry_backoff())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs `op` until it succeeds, fails permanently or the tries are used up.
    /// `op` receives the 1-based try number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> GatewayResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    tracing::warn!(attempt, error = %e, "transient gateway error, retrying");
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::payments::GatewayError;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(GatewayError::Network("connection reset".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_stop_immediately() {
        let calls = AtomicU32::new(0);
        let result: GatewayResult<()> = policy()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::CardDeclined("insufficient_funds".into())) }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::CardDeclined(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: GatewayResult<()> = policy()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::Network("timeout".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }
}
