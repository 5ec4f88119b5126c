//! # Drive engine
//!
//! Turns the vehicle state into motor duties once per cycle. The engine never writes to the
//! motors itself, it produces a [`Decision`] which the caller passes through the arbiter so that
//! the emergency check and the write are atomic.
//!
//! Obstacle avoidance is a short blocking sequence of timed steps, see [`manoeuvre`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod manoeuvre;
mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;
use std::time::Duration;

use comms_if::tc::drive::LineState;

pub use params::*;
pub use state::*;

use crate::actuator::{Duties, ZERO_DUTIES};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Logical duty of each motor. Positive is forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MotorCommand {
    pub duties: Duties,
}

/// One step of a manoeuvre, the command is held for `hold` before the next step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: &'static str,
    pub cmd: MotorCommand,
    pub hold: Duration,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What the drive engine wants done this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Drive(MotorCommand),
    Manoeuvre(Vec<Step>),
}

/// Why the engine made its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    /// The vehicle may not move
    Stopped,
    Manual,

    /// Avoid mode, nothing in range
    Clear,

    /// Avoid mode, slowing for an obstacle
    Slow,

    /// Backing away from an obstacle
    Obstacle,

    /// No recent distance reading
    DistanceStale,

    OnLine(LineState),

    /// Line lost, creeping forward
    LineSearch,
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Drive engine has not been initialised")]
    NotInitialised,

    #[error("Invalid drive parameters: {0}")]
    InvalidParams(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotorCommand {
    pub fn zero() -> Self {
        Self {
            duties: ZERO_DUTIES,
        }
    }

    /// Every wheel at the same duty.
    pub fn uniform(duty: i32) -> Self {
        Self { duties: [duty; 4] }
    }

    /// Left wheels at `left` and right wheels at `right`.
    pub fn sides(left: i32, right: i32) -> Self {
        Self {
            duties: [left, right, left, right],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.duties == ZERO_DUTIES
    }
}

impl DriveStatus {
    pub fn name(&self) -> &'static str {
        match self {
            DriveStatus::Stopped => "stopped",
            DriveStatus::Manual => "manual",
            DriveStatus::Clear => "clear",
            DriveStatus::Slow => "slow",
            DriveStatus::Obstacle => "obstacle",
            DriveStatus::DistanceStale => "distance stale",
            DriveStatus::OnLine(l) => l.name(),
            DriveStatus::LineSearch => "line search",
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a speed percentage into a duty in `[0, max_duty]`.
pub fn pct_to_duty(pct: f64, max_duty: i32) -> i32 {
    if !pct.is_finite() {
        return 0;
    }

    (pct * max_duty as f64 / 100.0)
        .round()
        .clamp(0.0, max_duty as f64) as i32
}

/// Convert a duty into a percentage of `max_duty`, ignoring direction.
pub fn duty_to_pct(duty: i32, max_duty: i32) -> u8 {
    if max_duty <= 0 {
        return 0;
    }

    (duty.unsigned_abs() as f64 * 100.0 / max_duty as f64)
        .round()
        .min(100.0) as u8
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pct_to_duty() {
        assert_eq!(pct_to_duty(40.0, 4095), 1638);
        assert_eq!(pct_to_duty(100.0, 4095), 4095);
        assert_eq!(pct_to_duty(150.0, 4095), 4095);
        assert_eq!(pct_to_duty(-10.0, 4095), 0);
        assert_eq!(pct_to_duty(f64::NAN, 4095), 0);

        assert_eq!(duty_to_pct(-1638, 4095), 40);
        assert_eq!(duty_to_pct(4095, 4095), 100);
    }

    #[test]
    fn test_sides() {
        assert_eq!(MotorCommand::sides(1, 2).duties, [1, 2, 1, 2]);
        assert!(MotorCommand::zero().is_zero());
        assert!(!MotorCommand::uniform(1).is_zero());
    }
}
