//! Retry with exponential backoff for remote calls

use std::time::{Duration, Instant};

use crate::error::RemoteError;
use crate::shutdown::CancelToken;

/// Longest uninterrupted stretch of a backoff sleep
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Backoff schedule applied to every remote call.
///
/// Attempt `n` (1-based) that fails transiently sleeps
/// `min(base_delay * 2^(n-1), max_delay)` before attempt `n + 1`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Policy without sleeping between attempts (tests, dry runs)
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only [`RemoteError::is_transient`] errors are retried. The last error
    /// is returned unchanged on exhaustion. Global shutdown cuts the
    /// backoff short.
    pub fn call<T>(
        &self,
        label: &str,
        op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        self.call_until(label, &CancelToken::new(), op)
    }

    /// Like [`call`](Self::call), but the backoff ends as soon as `cancel`
    /// trips and the last error is returned.
    pub fn call_until<T>(
        &self,
        label: &str,
        cancel: &CancelToken,
        mut op: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max_attempts && e.is_transient() => {
                    let delay = self.backoff_duration(attempt);
                    log::debug!(
                        "{label}: attempt {attempt}/{max_attempts} failed: {e}, retrying in {delay:?}"
                    );
                    if !sleep_unless_cancelled(delay, cancel) {
                        log::debug!("{label}: cancelled during backoff");
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        log::error!("{label}: giving up after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Sleep for `delay` in short slices. Returns `false` if `cancel` tripped.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
