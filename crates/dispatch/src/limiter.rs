//! Pacing limiter for job starts
//!
//! A token bucket with capacity 1 refilled every `interval`. One limiter is
//! shared by every worker in a pool, so it bounds the aggregate start rate;
//! worker count bounds concurrency separately.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Shared pacing limiter
///
/// # Example
///
/// ```
/// use everruns_dispatch::RateLimiter;
///
/// // An API allowing 30 requests per minute
/// let limiter = RateLimiter::per_minute(30);
/// assert_eq!(limiter.interval().as_secs(), 2);
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    /// Instant at which the next token becomes available
    next_token: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a limiter yielding one token every `interval` (zero disables pacing)
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_token: Mutex::new(Instant::now()),
        }
    }

    /// Create a limiter from a requests-per-minute quota
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(crate::config::interval_for_quota(requests_per_minute))
    }

    /// The refill interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether pacing is disabled
    pub fn is_unlimited(&self) -> bool {
        self.interval.is_zero()
    }

    /// Wait for the next token
    ///
    /// Tokens are reserved in call order, so concurrent callers are released
    /// one interval apart. An idle limiter banks at most one token.
    pub async fn acquire(&self) {
        if let Some(deadline) = self.reserve() {
            tokio::time::sleep_until(deadline).await;
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }
        let mut next = self.next_token.lock();
        let now = Instant::now();
        if *next <= now {
            *next = now + self.interval;
            true
        } else {
            false
        }
    }

    /// Reserve the next token, returning the instant to wait for (`None` if no wait)
    fn reserve(&self) -> Option<Instant> {
        if self.is_unlimited() {
            return None;
        }
        let mut next = self.next_token.lock();
        let now = Instant::now();
        let slot = (*next).max(now);
        *next = slot + self.interval;
        (slot > now).then_some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_minute_interval() {
        assert_eq!(RateLimiter::per_minute(60).interval(), Duration::from_secs(1));
        assert!(RateLimiter::per_minute(0).is_unlimited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_token_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(4));
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_are_spaced_by_interval() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_banks_one_token() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;

        // Idle for much longer than one interval
        tokio::time::sleep(Duration::from_secs(10)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        for _ in 0..100 {
            limiter.acquire().await;
            assert!(limiter.try_acquire());
        }
    }
}
