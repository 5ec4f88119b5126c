//! # Telemetry and audit trail
//!
//! Three things leave the vehicle as a record of what it is doing:
//!
//! - [`TelemetryLogger`] appends a snapshot of the vehicle state to a daily CSV file at a fixed
//!   interval,
//! - [`AuditLog`] appends every state transition to a daily JSON lines file and announces
//!   emergency stops on the status feed,
//! - [`StatusReporter`] keeps the heartbeat and motor duty feeds up to date.
//!
//! Archive writes happen on background threads and network sends go through the
//! [`RateLimitedPublisher`], so nothing here blocks the control cycle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Local};
use log::debug;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use comms_if::{
    feeds::FeedTable,
    net::{Message, Qos},
};
use util::{
    archive::{ArchiveFormat, ArchiveWriter, DailyArchive},
    retry::RetryPolicy,
    schedule::Periodic,
    time::Clock,
};

use crate::{
    actuator::Duties,
    arbiter::{ArbiterEvent, EventSink, VehicleState},
    drive::duty_to_pct,
    publisher::RateLimitedPublisher,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Heartbeat payload while the vehicle is up.
pub const ONLINE: &str = "online";

/// Heartbeat payload once the vehicle has gone, also used as the last will.
pub const OFFLINE: &str = "offline";

/// Status payload when an emergency stop is engaged.
pub const STATUS_EMERGENCY: &str = "emergency";

/// Status payload when an emergency stop is cleared.
pub const STATUS_CLEAR: &str = "clear";

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// An archive which must be flushed and closed during shutdown.
pub trait ArchiveSink: Send + Sync {
    fn name(&self) -> &str;

    /// Flush and close, waiting at most `timeout`. Returns `true` if everything was written.
    fn close(&self, timeout: Duration) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One row of the telemetry archive.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: String,

    /// Units: seconds
    pub elapsed_s: f64,

    pub distance_cm: Option<u32>,
    pub line: Option<&'static str>,
    pub running: bool,
    pub emergency: bool,
    pub speed_pct: u8,
    pub mode: &'static str,
    pub duty_fl: i32,
    pub duty_fr: i32,
    pub duty_rl: i32,
    pub duty_rr: i32,
    pub event: Option<String>,
}

/// One line of the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,

    /// Units: seconds
    pub elapsed_s: f64,

    pub event: &'static str,
    pub detail: Option<String>,
    pub running: bool,
    pub emergency: bool,
    pub speed_pct: u8,
    pub mode: &'static str,
}

/// Writes a state snapshot to the telemetry archive every interval.
pub struct TelemetryLogger {
    writer: ArchiveWriter<TelemetryRecord>,
    periodic: Mutex<Periodic>,
}

/// Records every state transition.
pub struct AuditLog {
    writer: ArchiveWriter<AuditRecord>,
    publisher: Arc<RateLimitedPublisher>,
    status_topic: String,
}

#[derive(Debug, Clone, Copy)]
pub struct StatusParams {
    /// Units: seconds
    pub heartbeat_interval_s: f64,

    /// Units: seconds
    pub motor_pub_interval_s: f64,

    /// Units: percent
    pub motor_pub_min_delta_pct: u8,

    pub max_duty: i32,
}

/// Keeps the heartbeat and motor duty feeds up to date.
pub struct StatusReporter {
    publisher: Arc<RateLimitedPublisher>,
    params: StatusParams,

    heartbeat_topic: String,
    motor_l_topic: String,
    motor_r_topic: String,

    heartbeat: Periodic,
    motor: Periodic,

    /// Last published duty of each side.
    ///
    /// Units: percent
    last_l: Option<u8>,
    last_r: Option<u8>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TelemetryRecord {
    pub fn snapshot(
        state: &VehicleState,
        stamp: DateTime<Local>,
        elapsed_s: f64,
        event: Option<&str>,
    ) -> Self {
        let [duty_fl, duty_fr, duty_rl, duty_rr] = state.last_duties;

        Self {
            timestamp: stamp.to_rfc3339(),
            elapsed_s,
            distance_cm: state.last_distance_cm,
            line: state.last_line.map(|l| l.name()),
            running: state.running,
            emergency: state.emergency_active,
            speed_pct: state.speed_pct,
            mode: state.mode.name(),
            duty_fl,
            duty_fr,
            duty_rl,
            duty_rr,
            event: event.map(String::from),
        }
    }
}

impl TelemetryLogger {
    /// Start a logger writing `telemetry_<date>.csv` files into `dir`.
    pub fn new<P: AsRef<Path>>(
        dir: P,
        interval_s: f64,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> std::io::Result<Self> {
        let archive = DailyArchive::new(dir, "telemetry", ArchiveFormat::Csv);

        Ok(Self {
            writer: ArchiveWriter::spawn(archive, retry, clock)?,
            periodic: Mutex::new(Periodic::new(interval_s)),
        })
    }

    /// Log a snapshot if the interval has passed. Returns `true` if one was logged.
    pub fn maybe_log(&self, state: &VehicleState, now_s: f64) -> bool {
        let due = self
            .periodic
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .due(now_s);

        if due {
            self.push(state, now_s, None);
        }

        due
    }

    /// Log a snapshot tagged with an event, regardless of the interval.
    pub fn log_event(&self, state: &VehicleState, now_s: f64, event: &str) {
        self.push(state, now_s, Some(event));
    }

    fn push(&self, state: &VehicleState, now_s: f64, event: Option<&str>) {
        let stamp = Local::now();
        self.writer.push(
            stamp.date_naive(),
            TelemetryRecord::snapshot(state, stamp, now_s, event),
        );
    }
}

impl ArchiveSink for TelemetryLogger {
    fn name(&self) -> &str {
        "telemetry"
    }

    fn close(&self, timeout: Duration) -> bool {
        self.writer.close(timeout)
    }
}

impl AuditLog {
    /// Start an audit log writing `audit_<date>.jsonl` files into `dir`.
    ///
    /// Emergency transitions are also enqueued on `status_topic`.
    pub fn new<P: AsRef<Path>>(
        dir: P,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
        publisher: Arc<RateLimitedPublisher>,
        status_topic: &str,
    ) -> std::io::Result<Self> {
        let archive = DailyArchive::new(dir, "audit", ArchiveFormat::JsonLines);

        Ok(Self {
            writer: ArchiveWriter::spawn(archive, retry, clock)?,
            publisher,
            status_topic: status_topic.to_string(),
        })
    }
}

impl EventSink for AuditLog {
    fn on_event(&self, event: &ArbiterEvent, state: &VehicleState, now_s: f64) {
        let detail = match event {
            ArbiterEvent::Speed { from, to } => Some(format!("{} -> {}", from, to)),
            ArbiterEvent::Mode { from, to } => Some(format!("{} -> {}", from.name(), to.name())),
            _ => None,
        };

        let stamp = Local::now();
        self.writer.push(
            stamp.date_naive(),
            AuditRecord {
                timestamp: stamp.to_rfc3339(),
                elapsed_s: now_s,
                event: event.name(),
                detail,
                running: state.running,
                emergency: state.emergency_active,
                speed_pct: state.speed_pct,
                mode: state.mode.name(),
            },
        );

        let status = match event {
            ArbiterEvent::EmergencyEngaged => STATUS_EMERGENCY,
            ArbiterEvent::EmergencyCleared { .. } => STATUS_CLEAR,
            _ => return,
        };
        self.publisher
            .enqueue(&self.status_topic, status, false, Qos::AtLeastOnce);
    }
}

impl ArchiveSink for AuditLog {
    fn name(&self) -> &str {
        "audit"
    }

    fn close(&self, timeout: Duration) -> bool {
        self.writer.close(timeout)
    }
}

impl Default for StatusParams {
    fn default() -> Self {
        Self {
            heartbeat_interval_s: 60.0,
            motor_pub_interval_s: 3.0,
            motor_pub_min_delta_pct: 5,
            max_duty: 4095,
        }
    }
}

impl StatusReporter {
    pub fn new(
        publisher: Arc<RateLimitedPublisher>,
        feeds: &FeedTable,
        params: StatusParams,
    ) -> Self {
        Self {
            publisher,
            params,
            heartbeat_topic: feeds.heartbeat.clone(),
            motor_l_topic: feeds.motor_l.clone(),
            motor_r_topic: feeds.motor_r.clone(),
            heartbeat: Periodic::new(params.heartbeat_interval_s),
            motor: Periodic::new(params.motor_pub_interval_s),
            last_l: None,
            last_r: None,
        }
    }

    /// Enqueue the retained online marker and restart the heartbeat interval.
    pub fn announce_online(&mut self, now_s: f64) {
        self.heartbeat.reset();
        self.heartbeat.due(now_s);
        self.publisher
            .enqueue_msg(&online_msg(&self.heartbeat_topic));
    }

    /// Offer the heartbeat and the duties just written to the publisher.
    pub fn tick(&mut self, now_s: f64, duties: Duties) {
        if self.heartbeat.due(now_s) {
            debug!("Heartbeat");
            self.publisher
                .enqueue_msg(&online_msg(&self.heartbeat_topic));
        }

        if !self.motor.due(now_s) {
            return;
        }

        let (left, right) = side_pcts(duties, self.params.max_duty);
        let min_delta = self.params.motor_pub_min_delta_pct;

        if moved(self.last_l, left, min_delta) {
            self.publisher.enqueue(
                &self.motor_l_topic,
                &left.to_string(),
                false,
                Qos::AtMostOnce,
            );
            self.last_l = Some(left);
        }

        if moved(self.last_r, right, min_delta) {
            self.publisher.enqueue(
                &self.motor_r_topic,
                &right.to_string(),
                false,
                Qos::AtMostOnce,
            );
            self.last_r = Some(right);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// The retained online marker.
pub fn online_msg(heartbeat_topic: &str) -> Message {
    Message::new(heartbeat_topic, ONLINE)
        .retained(true)
        .with_qos(Qos::AtLeastOnce)
}

/// The retained offline marker, sent on shutdown and registered as the last will.
pub fn offline_msg(heartbeat_topic: &str) -> Message {
    Message::new(heartbeat_topic, OFFLINE)
        .retained(true)
        .with_qos(Qos::AtLeastOnce)
}

/// Percentage duty of the left and right sides.
pub fn side_pcts(duties: Duties, max_duty: i32) -> (u8, u8) {
    let [fl, fr, rl, rr] = duties;

    (
        duty_to_pct((fl + rl) / 2, max_duty),
        duty_to_pct((fr + rr) / 2, max_duty),
    )
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn moved(last: Option<u8>, now: u8, min_delta: u8) -> bool {
    match last {
        Some(l) => l.abs_diff(now) >= min_delta,
        None => true,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
