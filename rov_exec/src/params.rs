//! # Rover Executable Parameters
//!
//! This module provides parameters for the rover executable. Every field has a default so that a
//! parameter file only needs to list what it changes, but unknown keys are an error so that a
//! typo is never silently ignored.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use comms_if::{feeds::FeedKeys, net::NetParams, tc::drive::MAX_SPEED_PCT};
use util::{retry::RetryPolicy, time};

use crate::{
    arbiter::ArbiterParams, drive::DriveParams, publisher::PublisherParams,
    supervisor::SupervisorParams, telemetry::StatusParams,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Environment variable holding the operator's username.
pub const USERNAME_ENV: &str = "SMARTPATH_USERNAME";

/// Environment variable holding the operator's key.
pub const KEY_ENV: &str = "SMARTPATH_KEY";

/// Environment variable holding the feed prefix.
pub const PREFIX_ENV: &str = "SMARTPATH_PREFIX";

/// Environment variable overriding `emergency_auto_resume`.
pub const AUTO_RESUME_ENV: &str = "SMARTPATH_AUTO_RESUME";

/// Feed prefix used if none is set in the environment.
pub const DEFAULT_PREFIX: &str = "smartpath";

/// Largest duty the motor driver accepts.
pub const MAX_BOARD_DUTY: i32 = 4095;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RovExecParams {
    // ---- DRIVE ----
    /// Distance below which an obstacle is avoided.
    ///
    /// Units: centimeters
    pub obstacle_near_cm: u32,

    /// Distance below which the vehicle slows down in avoid mode.
    ///
    /// Units: centimeters
    pub obstacle_far_cm: u32,

    /// Units: milliseconds
    pub reverse_ms: u64,

    /// Units: milliseconds
    pub turn_ms: u64,

    /// Hold between the steps of an obstacle manoeuvre.
    ///
    /// Units: milliseconds
    pub pause_ms: u64,

    /// Units: percent
    pub line_follow_speed_pct: u8,

    /// Fraction of the base duty kept by the inner wheels while turning back onto the line.
    pub line_turn_ratio: f64,

    /// Fraction of the base duty used while the line is lost.
    pub line_search_ratio: f64,

    /// Maximum age of a sensor reading before it is ignored.
    ///
    /// Units: seconds
    pub sensor_stale_s: f64,

    // ---- MOTORS ----
    /// Largest duty sent to a motor.
    pub max_duty: i32,

    /// Physical sign of a forward duty, depends on how the motors are wired.
    pub forward_sign: i32,

    /// Units: percent
    pub initial_speed_pct: u8,

    /// Hold after zeroing the motors.
    ///
    /// Units: milliseconds
    pub settle_ms: u64,

    // ---- SAFETY ----
    /// Restore the running state when an emergency stop is cleared.
    pub emergency_auto_resume: bool,

    // ---- PUBLISHING ----
    /// Minimum time between two publishes, set by the provider.
    ///
    /// Units: seconds
    pub min_publish_interval_s: f64,

    /// Units: seconds
    pub publish_period_s: f64,

    pub publish_retry_attempts: u32,

    /// Units: milliseconds
    pub publish_retry_delay_ms: u64,

    /// Time allowed for the last flush during shutdown.
    ///
    /// Units: seconds
    pub final_flush_timeout_s: f64,

    /// Units: seconds
    pub heartbeat_interval_s: f64,

    /// Units: seconds
    pub motor_pub_interval_s: f64,

    /// Smallest change of a side's duty worth publishing.
    ///
    /// Units: percent
    pub motor_pub_min_delta_pct: u8,

    // ---- ARCHIVES ----
    /// Units: seconds
    pub telemetry_interval_s: f64,

    pub archive_retry_attempts: u32,

    /// Units: milliseconds
    pub archive_retry_delay_ms: u64,

    // ---- EXECUTION ----
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Time allowed for each background thread to exit during shutdown.
    ///
    /// Units: seconds
    pub join_timeout_s: f64,

    pub actuator: ActuatorKind,

    pub sensors: SensorKind,

    // ---- TABLES ----
    pub net: NetParams,

    pub feeds: FeedKeys,
}

/// Operator credentials, read from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub key: String,
    pub prefix: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which actuator drives the wheels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Demands are sent to `mech_exec`
    Mech,

    /// Demands are only recorded
    Sim,
}

/// Where sensor readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Readings arrive on the distance and line feeds
    Remote,

    /// No sensors, readings on the feeds are refused
    None,

    /// Readings are generated locally, readings on the feeds are refused
    Sim,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("Invalid parameter {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("The {0} environment variable is not set or is empty")]
    Missing(&'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for RovExecParams {
    fn default() -> Self {
        Self {
            obstacle_near_cm: 20,
            obstacle_far_cm: 40,
            reverse_ms: 400,
            turn_ms: 350,
            pause_ms: 150,
            line_follow_speed_pct: 30,
            line_turn_ratio: 0.3,
            line_search_ratio: 0.5,
            sensor_stale_s: 1.0,
            max_duty: MAX_BOARD_DUTY,
            forward_sign: -1,
            initial_speed_pct: 35,
            settle_ms: 50,
            emergency_auto_resume: false,
            min_publish_interval_s: 2.1,
            publish_period_s: 0.1,
            publish_retry_attempts: 3,
            publish_retry_delay_ms: 200,
            final_flush_timeout_s: 3.0,
            heartbeat_interval_s: 60.0,
            motor_pub_interval_s: 3.0,
            motor_pub_min_delta_pct: 5,
            telemetry_interval_s: 1.0,
            archive_retry_attempts: 3,
            archive_retry_delay_ms: 100,
            cycle_period_s: 0.05,
            join_timeout_s: 1.5,
            actuator: ActuatorKind::Mech,
            sensors: SensorKind::Remote,
            net: NetParams::default(),
            feeds: FeedKeys::default(),
        }
    }
}

impl RovExecParams {
    /// Check the values which serde can't.
    pub fn validate(&self) -> Result<(), ParamsError> {
        fn check(ok: bool, name: &'static str, msg: String) -> Result<(), ParamsError> {
            if ok {
                Ok(())
            } else {
                Err(ParamsError::Invalid(name, msg))
            }
        }

        check(
            self.obstacle_near_cm < self.obstacle_far_cm,
            "obstacle_near_cm",
            format!(
                "must be below obstacle_far_cm ({} >= {})",
                self.obstacle_near_cm, self.obstacle_far_cm
            ),
        )?;
        check(
            self.max_duty > 0 && self.max_duty <= MAX_BOARD_DUTY,
            "max_duty",
            format!("must be in 1..={}, got {}", MAX_BOARD_DUTY, self.max_duty),
        )?;
        check(
            self.forward_sign == 1 || self.forward_sign == -1,
            "forward_sign",
            format!("must be 1 or -1, got {}", self.forward_sign),
        )?;

        for (name, pct) in [
            ("initial_speed_pct", self.initial_speed_pct),
            ("line_follow_speed_pct", self.line_follow_speed_pct),
            ("motor_pub_min_delta_pct", self.motor_pub_min_delta_pct),
        ] {
            check(
                pct <= MAX_SPEED_PCT,
                name,
                format!("must be at most {}, got {}", MAX_SPEED_PCT, pct),
            )?;
        }

        for (name, ratio) in [
            ("line_turn_ratio", self.line_turn_ratio),
            ("line_search_ratio", self.line_search_ratio),
        ] {
            check(
                (0.0..=1.0).contains(&ratio),
                name,
                format!("must be in [0, 1], got {}", ratio),
            )?;
        }

        for (name, period) in [
            ("cycle_period_s", self.cycle_period_s),
            ("publish_period_s", self.publish_period_s),
            ("telemetry_interval_s", self.telemetry_interval_s),
            ("heartbeat_interval_s", self.heartbeat_interval_s),
            ("motor_pub_interval_s", self.motor_pub_interval_s),
            ("sensor_stale_s", self.sensor_stale_s),
        ] {
            check(
                period.is_finite() && period > 0.0,
                name,
                format!("must be positive, got {}", period),
            )?;
        }

        for (name, timeout) in [
            ("min_publish_interval_s", self.min_publish_interval_s),
            ("final_flush_timeout_s", self.final_flush_timeout_s),
            ("join_timeout_s", self.join_timeout_s),
        ] {
            check(
                timeout.is_finite() && timeout >= 0.0,
                name,
                format!("must not be negative, got {}", timeout),
            )?;
        }

        Ok(())
    }

    pub fn arbiter(&self) -> ArbiterParams {
        ArbiterParams {
            auto_resume: self.emergency_auto_resume,
            initial_speed_pct: self.initial_speed_pct,
        }
    }

    pub fn drive(&self) -> DriveParams {
        DriveParams {
            obstacle_near_cm: self.obstacle_near_cm,
            obstacle_far_cm: self.obstacle_far_cm,
            reverse_ms: self.reverse_ms,
            turn_ms: self.turn_ms,
            pause_ms: self.pause_ms,
            line_follow_speed_pct: self.line_follow_speed_pct,
            line_turn_ratio: self.line_turn_ratio,
            line_search_ratio: self.line_search_ratio,
            sensor_stale_s: self.sensor_stale_s,
            max_duty: self.max_duty,
        }
    }

    pub fn publisher(&self) -> PublisherParams {
        PublisherParams {
            min_interval_s: self.min_publish_interval_s,
            period_s: self.publish_period_s,
            retry: RetryPolicy::new(self.publish_retry_attempts, self.publish_retry_delay_ms),
        }
    }

    pub fn status(&self) -> StatusParams {
        StatusParams {
            heartbeat_interval_s: self.heartbeat_interval_s,
            motor_pub_interval_s: self.motor_pub_interval_s,
            motor_pub_min_delta_pct: self.motor_pub_min_delta_pct,
            max_duty: self.max_duty,
        }
    }

    pub fn supervisor(&self) -> SupervisorParams {
        SupervisorParams {
            final_flush_timeout_s: self.final_flush_timeout_s,
            join_timeout_s: self.join_timeout_s,
            cycle_period_s: self.cycle_period_s,
        }
    }

    pub fn archive_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.archive_retry_attempts, self.archive_retry_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        time::millis(self.settle_ms)
    }
}

impl Credentials {
    /// Read the credentials from the process environment.
    pub fn from_env() -> Result<Self, CredentialsError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Read the credentials through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CredentialsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(CredentialsError::Missing(name))
        };

        let prefix = lookup(PREFIX_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| String::from(DEFAULT_PREFIX));

        Ok(Self {
            username: required(USERNAME_ENV)?,
            key: required(KEY_ENV)?,
            prefix,
        })
    }
}

// Keep the key out of the logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("key", &"<hidden>")
            .field("prefix", &self.prefix)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read the auto resume override, `None` if it isn't set.
pub fn auto_resume_override<F>(lookup: F) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(AUTO_RESUME_ENV).map(|v| {
        matches!(
            v.trim().to_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        )
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
