use std::future::Future;
use std::time::Duration;

/// Bounded fixed-delay retry for network calls. One policy instance is shared
/// by every caller that talks to a remote API, instead of ad hoc retry loops.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `operation` until it succeeds or the attempt budget is spent,
    /// sleeping the fixed delay between attempts. Returns the last error on
    /// exhaustion.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let delay = self.delay;
        self.run_with(operation, move |_| delay).await
    }

    /// Like `run`, but the sleep before the next attempt is chosen per error,
    /// so callers can back off harder on application-level failures than on
    /// plain network hiccups.
    pub async fn run_with<T, E, F, Fut, D>(
        &self,
        mut operation: F,
        delay_for: D,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        D: Fn(&E) -> Duration,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(delay_for(&err)).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_without_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy(3)
            .run(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &str>(7) }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy(3)
            .run(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), &str> = fast_policy(3)
            .run(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("still down") }
            })
            .await;

        assert_eq!(result, Err("still down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn per_error_delay_is_consulted_between_attempts() {
        let consulted = Arc::new(AtomicU32::new(0));
        let chooser_calls = consulted.clone();

        let result: Result<(), &str> = fast_policy(3)
            .run_with(
                || async { Err("app error") },
                move |_| {
                    chooser_calls.fetch_add(1, Ordering::SeqCst);
                    Duration::from_millis(1)
                },
            )
            .await;

        assert_eq!(result, Err("app error"));
        // Chosen before each retry, not after the final failure.
        assert_eq!(consulted.load(Ordering::SeqCst), 2);
    }
}
