//! # Command arbiter
//!
//! The arbiter owns the one piece of truly shared state in the vehicle, the [`VehicleState`].
//! Commands arrive from the network thread, the drive engine reads and acts on the state from the
//! main cycle, and both go through the arbiter's lock so that no two updates interleave.
//!
//! Emergency stop always wins. Nothing can set `running` while an emergency is active, and the
//! motors are zeroed before the handler that stopped the vehicle returns.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use comms_if::tc::drive::{DriveMode, LineState};

pub use params::*;
pub use state::*;

use crate::actuator::{Duties, ZERO_DUTIES};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Receives every state transition made by the arbiter.
///
/// Sinks are called with the state lock held, so they must not block or call back into the
/// arbiter.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &ArbiterEvent, state: &VehicleState, now_s: f64);
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The authoritative state of the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleState {
    /// The operator wants the vehicle to move.
    pub running: bool,

    /// An emergency stop is in force.
    pub emergency_active: bool,

    /// Value of `running` when the emergency stop was engaged.
    pub was_running_before_emergency: bool,

    /// Units: percent
    pub speed_pct: u8,

    pub mode: DriveMode,

    pub last_line: Option<LineState>,

    /// Units: seconds
    pub last_line_s: Option<f64>,

    /// Units: centimeters
    pub last_distance_cm: Option<u32>,

    /// Units: seconds
    pub last_distance_s: Option<f64>,

    /// Logical duties most recently written.
    pub last_duties: Duties,

    /// The vehicle is shutting down and will never move again.
    pub halted: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Whether a command changed the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
}

/// A transition of the vehicle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterEvent {
    Running(bool),
    EmergencyEngaged,
    EmergencyCleared { resumed: bool },
    Speed { from: u8, to: u8 },
    Mode { from: DriveMode, to: DriveMode },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VehicleState {
    pub fn new(speed_pct: u8) -> Self {
        Self {
            running: false,
            emergency_active: false,
            was_running_before_emergency: false,
            speed_pct,
            mode: DriveMode::Manual,
            last_line: None,
            last_line_s: None,
            last_distance_cm: None,
            last_distance_s: None,
            last_duties: ZERO_DUTIES,
            halted: false,
        }
    }

    /// The vehicle is allowed to move.
    pub fn may_move(&self) -> bool {
        self.running && !self.emergency_active && !self.halted
    }

    /// The last distance reading if it is no older than `stale_s`.
    pub fn fresh_distance(&self, now_s: f64, stale_s: f64) -> Option<u32> {
        match (self.last_distance_cm, self.last_distance_s) {
            (Some(d), Some(t)) if now_s - t <= stale_s => Some(d),
            _ => None,
        }
    }
}

impl ArbiterEvent {
    /// Short name used in the audit trail.
    pub fn name(&self) -> &'static str {
        match self {
            ArbiterEvent::Running(true) => "running_on",
            ArbiterEvent::Running(false) => "running_off",
            ArbiterEvent::EmergencyEngaged => "emergency_engaged",
            ArbiterEvent::EmergencyCleared { resumed: false } => "emergency_cleared",
            ArbiterEvent::EmergencyCleared { resumed: true } => "emergency_cleared_resumed",
            ArbiterEvent::Speed { .. } => "speed",
            ArbiterEvent::Mode { .. } => "mode",
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
