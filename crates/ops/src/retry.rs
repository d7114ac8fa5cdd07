//! Retry and poll-until primitives.
//!
//! Every readiness check in the deployment pipeline is built from these
//! two pieces: [`RetryPolicy`] re-runs a fallible operation on transient
//! error kinds with exponential backoff, and [`poll_until`] samples a
//! probe at a fixed interval until it reports ready or a deadline passes.
//! Both block the calling task only; neither introduces parallelism, and
//! the only way to stop either early is a non-retryable error from the
//! wrapped operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ErrorKind, OpsError};

/// Retry budget for one class of operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    kinds: Vec<ErrorKind>,
    tries: u32,
    delay: Duration,
    backoff: u32,
}

impl RetryPolicy {
    /// A policy retrying `kinds` up to `tries` attempts total, sleeping
    /// `delay` between attempts (no backoff).
    #[must_use]
    pub fn new(kinds: &[ErrorKind], tries: u32, delay: Duration) -> Self {
        Self {
            kinds: kinds.to_vec(),
            tries: tries.max(1),
            delay,
            backoff: 1,
        }
    }

    /// Multiply the delay by `backoff` after every failed attempt.
    #[must_use]
    pub fn with_backoff(mut self, backoff: u32) -> Self {
        self.backoff = backoff.max(1);
        self
    }

    /// Delay before retry number `attempt` (1-based): `delay * backoff^(attempt-1)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay * self.backoff.saturating_pow(attempt.saturating_sub(1))
    }

    /// Whether `error` is retryable under this policy.
    #[must_use]
    pub fn matches(&self, error: &OpsError) -> bool {
        self.kinds.contains(&error.kind())
    }

    /// Drive `op` under this policy.
    ///
    /// The operation runs at most `tries` times. A success returns
    /// immediately; an error whose kind is not in the policy propagates
    /// immediately; the final attempt's error propagates unchanged.
    ///
    /// # Errors
    ///
    /// The last error produced by `op`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, OpsError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpsError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if self.matches(&error) && attempt < self.tries => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        tries = self.tries,
                        delay_secs = delay.as_secs_f64(),
                        error = %error,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// One probe observation: ready with a value, or pending with a
/// diagnostic that ends up in the timeout error.
#[derive(Debug)]
pub enum Probe<T> {
    Ready(T),
    Pending(String),
}

/// Sample `probe` every `interval` until it reports ready or `timeout`
/// elapses.
///
/// The probe must be idempotent and cheap enough to run at `interval`
/// cadence; wrap it in a [`RetryPolicy`] when it should tolerate
/// transient errors (the two budgets are independent).
///
/// # Errors
///
/// Probe errors propagate immediately. On deadline, `TimeoutExpired`
/// carries `what` and the last pending diagnostic. Wall time never
/// exceeds `timeout` by more than one `interval`.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T, OpsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, OpsError>>,
{
    let start = Instant::now();
    let mut last = String::from("no observation yet");
    loop {
        match probe().await? {
            Probe::Ready(value) => return Ok(value),
            Probe::Pending(observed) => {
                debug!(what, observed = %observed, "Still waiting");
                last = observed;
            }
        }
        if start.elapsed() >= timeout {
            return Err(OpsError::TimeoutExpired {
                what: what.to_string(),
                timeout,
                last,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn command_failed() -> OpsError {
        OpsError::CommandFailed {
            command: "oc get".into(),
            stderr: "connection refused".into(),
        }
    }

    #[test]
    fn test_delay_for_attempt_backoff() {
        let policy = RetryPolicy::new(
            &[ErrorKind::CommandFailed],
            5,
            Duration::from_millis(100),
        )
        .with_backoff(2);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_without_backoff_is_flat() {
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 5, Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 3, Duration::from_millis(1));
        let result = policy
            .run(move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(command_failed())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_keeps_error_kind() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 4, Duration::from_millis(1));
        let err = policy
            .run(move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(command_failed())
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
    }

    #[tokio::test]
    async fn test_non_matching_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let policy = RetryPolicy::new(&[ErrorKind::CommandFailed], 5, Duration::from_millis(1));
        let err = policy
            .run(move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(OpsError::ResourceNotFound("pod/missing".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn test_poll_until_counts_probes() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let value = poll_until(
            "test readiness",
            Duration::from_secs(5),
            Duration::from_millis(5),
            move || async move {
                let n = calls_ref.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Ok(Probe::Pending(format!("attempt {n}")))
                } else {
                    Ok(Probe::Ready("ready"))
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_poll_until_times_out_with_last_observation() {
        let start = std::time::Instant::now();
        let err = poll_until(
            "stuck resource",
            Duration::from_millis(50),
            Duration::from_millis(10),
            || async { Ok::<Probe<()>, OpsError>(Probe::Pending("phase=Pending".into())) },
        )
        .await
        .unwrap_err();
        // Bounded by timeout + one interval.
        assert!(start.elapsed() < Duration::from_millis(200));
        match err {
            OpsError::TimeoutExpired { what, last, .. } => {
                assert_eq!(what, "stuck resource");
                assert_eq!(last, "phase=Pending");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_poll_until_probe_error_stops_early() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let err = poll_until(
            "broken probe",
            Duration::from_secs(5),
            Duration::from_millis(5),
            move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err::<Probe<()>, _>(command_failed())
            },
        )
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
    }
}
