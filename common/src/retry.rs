// Retry logic with exponential backoff and per-endpoint circuit breaking
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 3 attempts, 0.5s -> 1s -> 2s. Used for database writes.
    pub fn persistence() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
            exponential_base: 2.0,
        }
    }

    pub async fn execute<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_if(f, |_| true).await
    }

    /// Retry while `retryable` holds; a non-retryable error is returned at once.
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        mut f: F,
        retryable: P,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        let mut delay = self.initial_delay;

        loop {
            attempt += 1;

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("retry succeeded after {} attempts", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !retryable(&e) || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    warn!(
                        "attempt {}/{} failed: {}. retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );

                    sleep(delay).await;

                    if self.exponential_base > 1.0 {
                        let next_ms = (delay.as_millis() as f64 * self.exponential_base) as u64;
                        delay = Duration::from_millis(next_ms.min(self.max_delay.as_millis() as u64));
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-endpoint circuit breaker.
///
/// Opens after `threshold` consecutive failures, rejects use for `cooldown`,
/// then grants exactly one half-open trial request. A successful trial closes
/// the breaker and resets the counter; a failed trial reopens it.
pub struct EndpointBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    cooldown: Duration,
}

impl EndpointBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            threshold,
            cooldown,
        }
    }

    /// Whether the caller may issue a request right now. An open breaker past
    /// its cooldown flips to half-open and admits this caller as the single
    /// trial; concurrent callers keep seeing a rejection until the trial
    /// completes.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.state == BreakerState::HalfOpen || inner.consecutive_failures >= self.threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = EndpointBreaker::new(5, Duration::from_secs(60));

        for _ in 0..4 {
            assert!(breaker.try_acquire());
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);

        // fifth consecutive failure trips the breaker
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // sixth attempt is rejected without any I/O
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = EndpointBreaker::new(5, Duration::from_secs(60));

        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_grants_a_single_trial() {
        let breaker = EndpointBreaker::new(1, Duration::from_millis(10));

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());

        std::thread::sleep(Duration::from_millis(15));

        // first caller after the cooldown becomes the trial
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // a concurrent caller is still rejected
        assert!(!breaker.try_acquire());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn failed_trial_reopens_the_breaker() {
        let breaker = EndpointBreaker::new(1, Duration::from_millis(10));

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.try_acquire());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[tokio::test]
    async fn retry_policy_stops_on_non_retryable() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            exponential_base: 2.0,
        };

        let mut calls = 0u32;
        let result: std::result::Result<(), String> = policy
            .execute_if(
                || {
                    calls += 1;
                    async move { Err("fatal".to_string()) }
                },
                |e| e != "fatal",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_policy_exhausts_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            exponential_base: 2.0,
        };

        let mut calls = 0u32;
        let result: std::result::Result<(), String> = policy
            .execute(|| {
                calls += 1;
                async move { Err("transient".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
