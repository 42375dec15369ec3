//! Bounded polling of an eventually-true condition.
//!
//! A [`Probe`] is sampled immediately and then once per interval on a fixed
//! schedule anchored at the first attempt, until it succeeds or the next
//! scheduled attempt would fall past the timeout. Exhaustion hands back the
//! error from the final attempt rather than a generic timeout, so callers see
//! the condition that was actually blocking (for example "3 of 5 ready").

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
}

/// Timeout and sampling interval for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryWindow {
    timeout: Duration,
    interval: Duration,
}

impl RetryWindow {
    /// A timeout shorter than the interval is accepted and yields exactly one
    /// attempt.
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self, RetryError> {
        if interval.is_zero() {
            return Err(RetryError::ZeroInterval);
        }
        Ok(Self { timeout, interval })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on probe invocations: `floor(timeout / interval) + 1`.
    pub fn max_attempts(&self) -> u32 {
        let ticks = self.timeout.as_nanos() / self.interval.as_nanos();
        u32::try_from(ticks).unwrap_or(u32::MAX - 1) + 1
    }

    /// Offset from the first attempt at which attempt `n + 1` runs, if it is
    /// still inside the window.
    fn offset_after(&self, attempts_so_far: u32) -> Option<Duration> {
        self.interval
            .checked_mul(attempts_so_far)
            .filter(|offset| *offset <= self.timeout)
    }
}

/// One sample of a condition. Implementors keep whatever state they need
/// between attempts (last observation, counters) as plain fields.
#[async_trait]
pub trait Probe: Send {
    type Output: Send;
    type Error: Send;

    async fn attempt(&mut self) -> Result<Self::Output, Self::Error>;
}

/// Adapter turning an async closure into a [`Probe`].
pub struct ProbeFn<F>(F);

pub fn probe_fn<F, Fut, T, E>(f: F) -> ProbeFn<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send,
{
    ProbeFn(f)
}

#[async_trait]
impl<F, Fut, T, E> Probe for ProbeFn<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Send,
{
    type Output = T;
    type Error = E;

    async fn attempt(&mut self) -> Result<T, E> {
        (self.0)().await
    }
}

/// The window closed without a successful attempt.
#[derive(Debug, thiserror::Error)]
#[error("condition not met after {attempts} attempts in {elapsed:?}: {last_error}")]
pub struct Exhausted<E> {
    /// Error returned by the final attempt.
    pub last_error: E,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<E> Exhausted<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

/// Sample `probe` until it succeeds or `window` closes.
///
/// Attempts run at `0, interval, 2*interval, ...` measured from the first
/// attempt, never later than `timeout`. A slow probe delays the next attempt
/// but never adds extra ones, and once `timeout` has elapsed no further
/// attempt starts.
pub async fn poll<P>(
    probe: &mut P,
    window: RetryWindow,
) -> Result<P::Output, Exhausted<P::Error>>
where
    P: Probe + ?Sized,
    P::Error: fmt::Display,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let last_error = match probe.attempt().await {
            Ok(value) => {
                debug!(attempts, elapsed = ?start.elapsed(), "probe succeeded");
                return Ok(value);
            }
            Err(e) => e,
        };

        let elapsed = start.elapsed();
        let next = window
            .offset_after(attempts)
            .filter(|_| elapsed < window.timeout);
        match next {
            Some(offset) => {
                debug!(attempts, error = %last_error, next_in = ?offset.saturating_sub(elapsed), "probe failed, retrying");
                tokio::time::sleep_until(start + offset).await;
            }
            None => {
                warn!(attempts, ?elapsed, error = %last_error, "poll window exhausted");
                return Err(Exhausted {
                    last_error,
                    attempts,
                    elapsed,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_rejected() {
        assert_eq!(
            RetryWindow::new(Duration::from_secs(1), Duration::ZERO),
            Err(RetryError::ZeroInterval)
        );
    }

    #[test]
    fn max_attempts_counts_the_immediate_attempt() {
        let w = RetryWindow::new(Duration::from_secs(30), Duration::from_secs(10)).unwrap();
        assert_eq!(w.max_attempts(), 4);

        let w = RetryWindow::new(Duration::from_secs(35), Duration::from_secs(10)).unwrap();
        assert_eq!(w.max_attempts(), 4);
    }

    #[test]
    fn timeout_below_interval_allows_one_attempt() {
        let w = RetryWindow::new(Duration::from_secs(3), Duration::from_secs(10)).unwrap();
        assert_eq!(w.max_attempts(), 1);
        assert_eq!(w.offset_after(1), None);
    }

    #[test]
    fn offsets_stop_at_timeout() {
        let w = RetryWindow::new(Duration::from_secs(20), Duration::from_secs(5)).unwrap();
        assert_eq!(w.offset_after(4), Some(Duration::from_secs(20)));
        assert_eq!(w.offset_after(5), None);
    }
}
