//! Deadline and polling policy shared by every adapter

use crate::errors::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `fut` under a deadline; expiry becomes `AppError::ProviderTimeout`
pub async fn with_timeout<T, F>(label: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::ProviderTimeout {
            provider: label.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Fixed-interval polling with a hard attempt ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Worst-case wall time spent sleeping between attempts
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Classification of one status snapshot
#[derive(Debug, PartialEq, Eq)]
pub enum PollState<T> {
    Pending,
    Ready(T),
    Failed(String),
}

/// Poll `fetch` until `classify` reports a terminal state or the policy
/// ceiling is hit. Transport errors from `fetch` end the loop immediately.
pub async fn poll_until<S, T, F, Fut, C>(
    provider: &str,
    policy: PollPolicy,
    mut fetch: F,
    classify: C,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    C: Fn(S) -> PollState<T>,
{
    for attempt in 1..=policy.max_attempts {
        let snapshot = fetch().await?;

        match classify(snapshot) {
            PollState::Ready(value) => return Ok(value),
            PollState::Failed(message) => return Err(AppError::provider(provider, message)),
            PollState::Pending => {
                debug!(
                    provider = provider,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    "Job still running"
                );
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }

    Err(AppError::ProviderTimeout {
        provider: provider.to_string(),
        timeout_ms: policy.ceiling().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_timeout_fires_for_hung_call() {
        let result: Result<String> = with_timeout(
            "nano_banana",
            Duration::from_millis(50),
            std::future::pending(),
        )
        .await;

        match result {
            Err(AppError::ProviderTimeout { provider, timeout_ms }) => {
                assert_eq!(provider, "nano_banana");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_passes_through_fast_result() {
        let result = with_timeout("openai", Duration::from_secs(1), async {
            Ok::<_, AppError>(7)
        })
        .await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_poll_until_ready() {
        let calls = AtomicU32::new(0);
        let policy = PollPolicy::new(Duration::from_millis(1), 10);

        let value = poll_until(
            "kling",
            policy,
            || async { Ok::<_, AppError>(calls.fetch_add(1, Ordering::SeqCst) + 1) },
            |n| if n >= 3 { PollState::Ready(n * 10) } else { PollState::Pending },
        )
        .await
        .unwrap();

        assert_eq!(value, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_failed_carries_upstream_text() {
        let err = poll_until(
            "kling",
            PollPolicy::new(Duration::from_millis(1), 5),
            || async { Ok::<_, AppError>("failed") },
            |_| PollState::<()>::Failed("content policy violation".into()),
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "kling request failed: content policy violation");
    }

    #[tokio::test]
    async fn test_poll_until_hits_ceiling() {
        let calls = AtomicU32::new(0);
        let err = poll_until(
            "replicate",
            PollPolicy::new(Duration::from_millis(1), 4),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(())
            },
            |_| PollState::<()>::Pending,
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_policy_never_zero_attempts() {
        let policy = PollPolicy::new(Duration::from_secs(5), 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(PollPolicy::new(Duration::from_secs(5), 60).ceiling(), Duration::from_secs(300));
    }
}
