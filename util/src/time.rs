//! General time utility functions
//!
//! All cyclic code in the software reads time through the [`Clock`] trait rather than from the
//! system directly. Executables use a [`SystemClock`], tests use a [`ManualClock`] so that rate
//! limits, cadences and timed holds can be checked without sleeping for real.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of monotonic time which can also block the calling thread.
pub trait Clock: Send + Sync {
    /// Seconds elapsed since the clock's epoch.
    fn now_s(&self) -> f64;

    /// Block the calling thread for the given duration.
    fn sleep(&self, duration: Duration);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Monotonic wall clock, epoch is the instant the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

/// Simulated clock. Time only moves when `advance`, `set` or `sleep` is called.
#[derive(Debug, Default)]
pub struct ManualClock {
    inner: Mutex<ManualInner>,
}

#[derive(Debug, Default)]
struct ManualInner {
    now_s: f64,
    sleeps: Vec<Duration>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_s(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration)
        }
    }
}

impl ManualClock {
    /// Create a new clock starting at the given time.
    pub fn starting_at(now_s: f64) -> Self {
        Self {
            inner: Mutex::new(ManualInner {
                now_s,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move the clock forward by the given number of seconds.
    pub fn advance(&self, seconds: f64) {
        self.lock().now_s += seconds;
    }

    /// Jump the clock to the given time.
    pub fn set(&self, now_s: f64) {
        self.lock().now_s = now_s;
    }

    /// Every sleep requested of this clock, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now_s(&self) -> f64 {
        self.lock().now_s
    }

    fn sleep(&self, duration: Duration) {
        let mut inner = self.lock();
        inner.now_s += duration.as_secs_f64();
        inner.sleeps.push(duration);
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert a number of milliseconds from a parameter file into a `Duration`.
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Convert a (possibly negative or NaN) number of seconds into a `Duration`, saturating at zero.
pub fn secs(s: f64) -> Duration {
    if s.is_finite() && s > 0.0 {
        Duration::from_secs_f64(s)
    } else {
        Duration::ZERO
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::starting_at(10.0);

        clock.sleep(Duration::from_millis(500));
        clock.advance(1.0);

        assert!((clock.now_s() - 11.5).abs() < 1e-9);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn test_secs_saturates() {
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(1.5), Duration::from_millis(1500));
    }

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(
            duration_to_seconds(chrono::Duration::milliseconds(2500)),
            Some(2.5)
        );
    }
}
