//! # Sensors
//!
//! Local sensor adapters. A reading of `None` means the sensor had nothing to say this cycle,
//! the arbiter keeps the last reading and the drive engine stops trusting it once it goes stale.
//!
//! Which sensors exist is decided once at startup from [`SensorKind`]. With `remote` sensors the
//! readings arrive as commands on the distance and line feeds instead, so the suite is empty.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};

use comms_if::tc::drive::LineState;

use crate::{arbiter::Arbiter, params::SensorKind};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Distance the simulated obstacle starts at.
///
/// Units: centimeters
const SIM_START_CM: u32 = 120;

/// Distance the simulated obstacle closes by each poll.
///
/// Units: centimeters
const SIM_STEP_CM: u32 = 2;

/// Repeating pattern of simulated line positions.
const SIM_LINE_PATTERN: [(LineState, usize); 4] = [
    (LineState::Center, 20),
    (LineState::Left, 5),
    (LineState::Center, 20),
    (LineState::Right, 5),
];

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait RangeSensor: Send {
    /// Distance to the nearest obstacle ahead, `None` if unavailable.
    fn read_distance_cm(&mut self) -> Option<u32>;
}

pub trait LineSensor: Send {
    /// Position of the line, `None` if unavailable.
    fn read_line_state(&mut self) -> Option<LineState>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The sensors fitted to the vehicle.
#[derive(Default)]
pub struct SensorSuite {
    range: Option<Box<dyn RangeSensor>>,
    line: Option<Box<dyn LineSensor>>,
}

/// An obstacle which approaches at a steady rate and then jumps away.
#[derive(Debug, Clone)]
pub struct SimRange {
    distance_cm: u32,
}

/// A line which drifts to either side now and then.
#[derive(Debug, Clone, Default)]
pub struct SimLine {
    poll: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SensorSuite {
    pub fn new(range: Option<Box<dyn RangeSensor>>, line: Option<Box<dyn LineSensor>>) -> Self {
        Self { range, line }
    }

    /// Build the suite for a configured kind.
    pub fn from_kind(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Sim => {
                info!("Using simulated sensors");
                Self::new(
                    Some(Box::new(SimRange::default())),
                    Some(Box::new(SimLine::default())),
                )
            }
            SensorKind::Remote => {
                info!("Sensor readings are taken from the network feeds");
                Self::default()
            }
            SensorKind::None => {
                info!("No sensors, only manual mode will move the vehicle");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_none() && self.line.is_none()
    }

    /// Read every sensor and record what they returned.
    pub fn poll(&mut self, arbiter: &Arbiter, now_s: f64) {
        if let Some(range) = self.range.as_mut() {
            match range.read_distance_cm() {
                Some(d) => {
                    arbiter.record_distance(d, now_s);
                }
                None => debug!("Range sensor unavailable"),
            }
        }

        if let Some(line) = self.line.as_mut() {
            match line.read_line_state() {
                Some(l) => {
                    arbiter.record_line(l, now_s);
                }
                None => debug!("Line sensor unavailable"),
            }
        }
    }
}

impl Default for SimRange {
    fn default() -> Self {
        Self {
            distance_cm: SIM_START_CM,
        }
    }
}

impl RangeSensor for SimRange {
    fn read_distance_cm(&mut self) -> Option<u32> {
        let d = self.distance_cm;

        self.distance_cm = match d.checked_sub(SIM_STEP_CM) {
            Some(next) if next > 0 => next,
            _ => SIM_START_CM,
        };

        Some(d)
    }
}

impl LineSensor for SimLine {
    fn read_line_state(&mut self) -> Option<LineState> {
        let period: usize = SIM_LINE_PATTERN.iter().map(|(_, n)| n).sum();
        let mut pos = self.poll % period;
        self.poll += 1;

        for (state, count) in SIM_LINE_PATTERN.iter() {
            if pos < *count {
                return Some(*state);
            }
            pos -= count;
        }

        None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
