//! Generic polling scheduler for waiting out transient cluster state.
//!
//! `until` repeatedly invokes a probe function until it reports success,
//! a terminal failure, or the wait budget is spent. Probes classify their
//! own outcome, which lets callers decide which failures are worth waiting
//! out (a pod that is not yet Running) and which are fatal (a rejected API
//! request) without building a state machine per call site.

use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout_at};

/// Classification of a single probe attempt.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The awaited condition holds; stop polling with success.
    Done,
    /// The condition does not hold yet; keep polling and remember the error.
    Minor(anyhow::Error),
    /// A failure that waiting will not fix; stop polling immediately.
    Severe(anyhow::Error),
}

/// Error type for `until` operations.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("retry timed out after {timeout:?}: {last}")]
    Timeout {
        timeout: Duration,
        #[source]
        last: anyhow::Error,
    },

    #[error(transparent)]
    Severe(anyhow::Error),
}

/// Poll `probe` until it resolves or `wait_timeout` elapses.
///
/// The probe runs once immediately, then on a fixed `interval` cadence.
/// A `Severe` outcome is returned at once; when the deadline elapses the
/// last `Minor` error is returned wrapped in [`RetryError::Timeout`]. The
/// deadline also cuts off a probe that hangs mid-attempt. Dropping the
/// returned future cancels the active attempt.
pub async fn until<F, Fut>(
    wait_timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<(), RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProbeOutcome>,
{
    let deadline = Instant::now() + wait_timeout;
    let mut last_minor: Option<anyhow::Error> = None;

    loop {
        match timeout_at(deadline, probe()).await {
            Ok(ProbeOutcome::Done) => return Ok(()),
            Ok(ProbeOutcome::Severe(err)) => return Err(RetryError::Severe(err)),
            Ok(ProbeOutcome::Minor(err)) => last_minor = Some(err),
            Err(_) => {
                return Err(RetryError::Timeout {
                    timeout: wait_timeout,
                    last: last_minor
                        .unwrap_or_else(|| anyhow::anyhow!("condition not met before deadline")),
                });
            }
        }

        let next = Instant::now() + interval;
        if next >= deadline {
            return Err(RetryError::Timeout {
                timeout: wait_timeout,
                last: last_minor
                    .unwrap_or_else(|| anyhow::anyhow!("condition not met before deadline")),
            });
        }
        sleep_until(next).await;
    }
}
