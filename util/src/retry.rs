//! Bounded retry of fallible operations
//!
//! Used for every transient I/O path in the software (telemetry publishing and archive appends).
//! An operation is attempted at most `attempts` times with a fixed delay between attempts, after
//! which a [`RetryError`] carrying the last error is returned.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fmt;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::time::Clock;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// How many times to attempt an operation and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Zero is treated as one.
    pub attempts: u32,

    /// Delay between consecutive attempts.
    ///
    /// Units: milliseconds
    pub delay_ms: u64,
}

/// The terminal failure of a retried operation.
#[derive(Debug, thiserror::Error)]
#[error("Operation abandoned after {attempts} attempt(s): {last}")]
pub struct RetryError<E> {
    /// Number of attempts that were made.
    pub attempts: u32,

    /// The error returned by the final attempt.
    #[source]
    pub last: E,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RetryPolicy {
    pub fn new(attempts: u32, delay_ms: u64) -> Self {
        Self { attempts, delay_ms }
    }

    /// The same policy with only as many attempts as fit into `budget_s` of delays.
    ///
    /// At least one attempt is always kept.
    pub fn within(&self, budget_s: f64) -> Self {
        if self.delay_ms == 0 {
            return *self;
        }

        let delay_s = self.delay_ms as f64 / 1000.0;
        let extra = (budget_s.max(0.0) / delay_s).floor();
        let fit = if extra >= u32::MAX as f64 {
            u32::MAX
        } else {
            extra as u32 + 1
        };

        Self {
            attempts: self.attempts.max(1).min(fit),
            delay_ms: self.delay_ms,
        }
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// `op` is given the 1-based attempt number. The delay is only applied between attempts,
    /// never after the final one.
    pub fn run<T, E, F>(&self, clock: &dyn Clock, mut op: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(t) => return Ok(t),
                Err(e) if attempt >= attempts => {
                    return Err(RetryError {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => {
                    debug!("Attempt {}/{} failed: {}", attempt, attempts, e);
                    clock.sleep(Duration::from_millis(self.delay_ms));
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 200,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::ManualClock;

    #[test]
    fn test_retry_succeeds_after_failures() {
        let clock = ManualClock::default();
        let policy = RetryPolicy::new(3, 100);

        let result: Result<u32, RetryError<String>> = policy.run(&clock, |n| {
            if n < 3 {
                Err(format!("fail {}", n))
            } else {
                Ok(n)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn test_retry_gives_up() {
        let clock = ManualClock::default();
        let policy = RetryPolicy::new(4, 50);
        let mut calls = 0;

        let err = policy
            .run(&clock, |_| -> Result<(), String> {
                calls += 1;
                Err(String::from("nope"))
            })
            .unwrap_err();

        assert_eq!(calls, 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, "nope");
        // No delay after the final attempt
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50); 3]);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let clock = ManualClock::default();
        let mut calls = 0;

        let _ = RetryPolicy::new(0, 10).run(&clock, |_| -> Result<(), String> {
            calls += 1;
            Err(String::new())
        });

        assert_eq!(calls, 1);
    }

    #[test]
    fn test_within_budget() {
        let policy = RetryPolicy::new(3, 200);

        assert_eq!(policy.within(10.0), policy);
        assert_eq!(policy.within(0.25).attempts, 2);
        assert_eq!(policy.within(0.1).attempts, 1);
        assert_eq!(policy.within(-1.0).attempts, 1);
        assert_eq!(RetryPolicy::new(5, 0).within(0.0).attempts, 5);
    }

    #[test]
    fn test_error_keeps_last_as_source() {
        use std::error::Error;

        let clock = ManualClock::default();
        let err = RetryPolicy::new(2, 10)
            .run(&clock, |_| -> Result<(), std::io::Error> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "link down"))
            })
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Operation abandoned after 2 attempt(s): link down"
        );
        assert_eq!(err.source().unwrap().to_string(), "link down");
    }
}
