//! Bounded exponential backoff for connection establishment.
//!
//! The command channel opens one connection per command, so a briefly busy
//! controller shows up as a refused connect.  [`Backoff::retry`] re-runs the
//! connect a small, fixed number of times with growing pauses in between.

use std::future::Future;
use std::time::Duration;

use graspos_types::ArmError;
use tracing::warn;

/// Exponential retry schedule: `initial`, `initial * factor`, … capped at
/// `max_delay`, for at most `max_attempts` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    factor: u32,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            factor: 2,
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max_delay,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pause inserted after the zero-based failed `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(self.factor.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.  The last
    /// error is returned unchanged.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, ArmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArmError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= self.max_attempts() => return Err(err),
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn refused() -> ArmError {
        ArmError::Connection {
            endpoint: "test".into(),
            details: "refused".into(),
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let b = Backoff::default();
        assert_eq!(b.delay_for(0), Duration::from_millis(100));
        assert_eq!(b.delay_for(1), Duration::from_millis(200));
        assert_eq!(b.delay_for(2), Duration::from_millis(400));
        assert_eq!(b.delay_for(10), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();
        let c = Arc::clone(&calls);
        let result: Result<(), _> = Backoff::default()
            .retry(|| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(refused()) }
            })
            .await;

        assert_eq!(result, Err(refused()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_on_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = Backoff::default()
            .retry(|| {
                let n = c.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Err(refused()) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_budget_still_tries_once() {
        let b = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 0);
        let result: Result<u8, _> = b.retry(|| async { Err(refused()) }).await;
        assert!(result.is_err());
    }
}
