//! Request pacing and application-level retry.
//!
//! Both suspend the calling thread. Time is read through [`Clock`] so tests can
//! run the schedule on virtual time with [`ManualClock`].

use log::{debug, error, warn};
use rand::Rng;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Virtual clock: `sleep` advances time instantly and records the requested duration.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *lock(&self.elapsed) += duration;
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *lock(&self.elapsed)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        lock(&self.sleeps).push(duration);
    }
}

/// Enforces a minimum spacing between consecutive requests.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// interval = 3600 / requests_per_hour seconds
    pub fn per_hour(requests_per_hour: u32) -> Self {
        let ceiling = requests_per_hour.max(1) as f64;
        Self {
            min_interval: Duration::from_secs_f64(3600.0 / ceiling),
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the interval since the previous request has elapsed, then mark a new request.
    pub fn wait(&self, clock: &dyn Clock) {
        let mut last = lock(&self.last_request);
        if let Some(previous) = *last {
            let elapsed = clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                debug!("Rate limiting: sleeping {:.3}s", remaining.as_secs_f64());
                clock.sleep(remaining);
            }
        }
        *last = Some(clock.now());
    }
}

/// Exponential backoff schedule: `initial_backoff * backoff_factor^attempt`, jittered.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    /// Inclusive multiplier range applied to each delay
    pub jitter: (f64, f64),
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: (0.8, 1.2),
        }
    }
}

/// Upper bound for any single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(86_400);

/// `duration * factor`, saturating at `Duration::MAX`; NaN or non-positive products give zero.
pub fn scale_duration(duration: Duration, factor: f64) -> Duration {
    let secs = duration.as_secs_f64() * factor;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Seconds from configuration as a `Duration`, saturating like [`scale_duration`]
pub fn duration_from_secs(secs: f64) -> Duration {
    scale_duration(Duration::from_secs(1), secs)
}

impl BackoffPolicy {
    /// Capped at [`MAX_BACKOFF`]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        scale_duration(self.initial_backoff, self.backoff_factor.powi(exponent)).min(MAX_BACKOFF)
    }

    /// Delay to sleep after the failed attempt with index `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let (low, high) = self.jitter;
        let factor = if high > low {
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };
        scale_duration(self.nominal_delay(attempt), factor).min(MAX_BACKOFF)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are used up. At most `max_retries + 1` attempts are made.
pub fn retry_with_backoff<T, E, F, P>(
    policy: &BackoffPolicy,
    clock: &dyn Clock,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:.2}s",
                    attempt + 1,
                    policy.max_retries + 1,
                    e,
                    delay.as_secs_f64()
                );
                clock.sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    error!("Giving up after {} attempts: {}", attempt + 1, e);
                }
                return Err(e);
            }
        }
    }
}
