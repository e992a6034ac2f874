//! Bounded polling
//!
//! Both wait loops of an order (challenge validation and DNS propagation)
//! are expressed as a [`RetryPolicy`] driven by [`poll_until`]: fetch a
//! value, ask a predicate whether we are done, sleep, repeat until the
//! attempt bound runs out. The total wait is bounded by
//! `delay * (max_attempts - 1)` plus the time spent in the fetches.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Attempt bound and delay for a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of fetches (values below 1 are treated as 1)
    pub max_attempts: u32,
    /// Delay between two fetches
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Effective attempt bound
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound on the time spent sleeping between attempts
    pub fn max_wait(&self) -> Duration {
        self.delay * (self.attempts() - 1)
    }
}

/// Decision returned by the predicate after each fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep polling
    Continue,
    /// The awaited condition holds
    Done,
    /// Stop now without waiting for the bound; the value is terminal
    Stop,
}

/// Why a poll loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEnd {
    Done,
    Stopped,
    Exhausted,
}

/// Last fetched value and how the loop ended
#[derive(Debug, Clone)]
pub struct PollOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub end: PollEnd,
}

impl<T> PollOutcome<T> {
    pub fn is_done(&self) -> bool {
        self.end == PollEnd::Done
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The cancellation token fired while polling
    #[error("polling cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    /// A fetch failed
    #[error(transparent)]
    Fetch(E),
}

/// Poll `fetch` until `verdict` says done or stop, or the policy runs out.
///
/// `fetch` receives the 1-based attempt number. Fetch errors end the loop
/// immediately; callers that want to tolerate transient errors should map
/// them into a value that the predicate treats as "not yet".
pub async fn poll_until<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut fetch: F,
    mut verdict: P,
) -> Result<PollOutcome<T>, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> Verdict,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled { attempts: attempt });
        }

        attempt += 1;
        let value = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts: attempt }),
            value = fetch(attempt) => value.map_err(PollError::Fetch)?,
        };

        let end = match verdict(&value) {
            Verdict::Done => Some(PollEnd::Done),
            Verdict::Stop => Some(PollEnd::Stopped),
            Verdict::Continue if attempt >= max_attempts => Some(PollEnd::Exhausted),
            Verdict::Continue => None,
        };

        if let Some(end) = end {
            trace!(attempt, max_attempts, end = ?end, "Poll loop finished");
            return Ok(PollOutcome {
                value,
                attempts: attempt,
                end,
            });
        }

        trace!(attempt, max_attempts, "Condition not met yet, waiting");

        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts: attempt }),
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_on_third_attempt() {
        let outcome = poll_until(
            &policy(10),
            &CancellationToken::new(),
            |attempt| async move { Ok::<_, Infallible>(attempt) },
            |value| if *value == 3 { Verdict::Done } else { Verdict::Continue },
        )
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert!(outcome.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_value() {
        let outcome = poll_until(
            &policy(4),
            &CancellationToken::new(),
            |attempt| async move { Ok::<_, Infallible>(attempt * 10) },
            |_| Verdict::Continue,
        )
        .await
        .unwrap();

        assert_eq!(outcome.end, PollEnd::Exhausted);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.value, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_skips_remaining_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let outcome = poll_until(
            &policy(60),
            &CancellationToken::new(),
            move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(())
                }
            },
            |_| Verdict::Stop,
        )
        .await
        .unwrap();

        assert_eq!(outcome.end, PollEnd::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_aborts() {
        let result = poll_until(
            &policy(5),
            &CancellationToken::new(),
            |_| async { Err::<(), _>("boom") },
            |_| Verdict::Continue,
        )
        .await;

        assert!(matches!(result, Err(PollError::Fetch("boom"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let handle = tokio::spawn(async move {
            poll_until(
                &RetryPolicy::new(100, Duration::from_secs(3600)),
                &cancel,
                |_| async { Ok::<_, Infallible>(()) },
                |_| Verdict::Continue,
            )
            .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(PollError::Cancelled { attempts: 1 })));
    }

    #[test]
    fn test_zero_attempts_treated_as_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(10));
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.max_wait(), Duration::ZERO);
    }

    proptest::proptest! {
        #[test]
        fn prop_max_wait_is_bounded(attempts in 1u32..500, delay_ms in 0u64..60_000) {
            let policy = RetryPolicy::new(attempts, Duration::from_millis(delay_ms));
            proptest::prop_assert_eq!(
                policy.max_wait(),
                Duration::from_millis(delay_ms * u64::from(attempts - 1))
            );
        }
    }
}
