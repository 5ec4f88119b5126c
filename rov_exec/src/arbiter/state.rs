//! Arbiter state and command handlers

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use comms_if::tc::{
    drive::{parse_distance, parse_line, parse_mode, parse_speed, parse_switch, LineState},
    Tc, TcKind, TcParseError,
};

use super::{Applied, ArbiterEvent, ArbiterParams, EventSink, VehicleState};
use crate::actuator::{Duties, MotorOutput, ZERO_DUTIES};
use crate::drive::MotorCommand;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Applies commands to the vehicle state and gates every write to the motors.
pub struct Arbiter {
    state: Mutex<VehicleState>,

    output: MotorOutput,

    params: ArbiterParams,

    sinks: Vec<Arc<dyn EventSink>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Arbiter {
    pub fn new(params: ArbiterParams, output: MotorOutput) -> Self {
        Self {
            state: Mutex::new(VehicleState::new(params.initial_speed_pct)),
            output,
            params,
            sinks: Vec::new(),
        }
    }

    /// Add a sink which will be told of every state transition.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Apply a telecommand.
    pub fn apply(&self, tc: &Tc, now_s: f64) -> Result<Applied, TcParseError> {
        debug!("Applying {} \"{}\"", tc.kind.name(), tc.payload);

        match tc.kind {
            TcKind::StartStop => Ok(self.apply_start_stop(&tc.payload, now_s)),
            TcKind::Emergency => Ok(self.apply_emergency(&tc.payload, now_s)),
            TcKind::Speed => self.apply_speed(&tc.payload, now_s),
            TcKind::Mode => Ok(self.apply_mode(&tc.payload, now_s)),
            TcKind::Line => self.apply_line_input(&tc.payload, now_s),
            TcKind::Distance => self.apply_distance_input(&tc.payload, now_s),
        }
    }

    /// Start or stop the vehicle. Stopping zeroes the motors before returning.
    pub fn apply_start_stop(&self, value: &str, now_s: f64) -> Applied {
        let requested = parse_switch(value);
        let mut state = self.lock();

        if requested && state.emergency_active {
            warn!("Start refused, emergency stop is active");
        }

        let running = requested && !state.emergency_active && !state.halted;
        let applied = if running != state.running {
            state.running = running;
            info!("Running: {}", running);
            self.emit(ArbiterEvent::Running(running), &state, now_s);
            Applied::Changed
        } else {
            Applied::Unchanged
        };

        if !running {
            self.zero(&mut state);
            drop(state);
            self.output.settle();
        }

        applied
    }

    /// Engage or clear the emergency stop.
    pub fn apply_emergency(&self, value: &str, now_s: f64) -> Applied {
        let engage = parse_switch(value);
        let mut state = self.lock();

        if engage == state.emergency_active {
            debug!("Emergency already {}", if engage { "engaged" } else { "clear" });
            return Applied::Unchanged;
        }

        if engage {
            state.was_running_before_emergency = state.running;
            state.running = false;
            state.emergency_active = true;
            self.zero(&mut state);

            warn!("EMERGENCY STOP engaged");
            self.emit(ArbiterEvent::EmergencyEngaged, &state, now_s);

            drop(state);
            self.output.settle();
        } else {
            state.emergency_active = false;

            let resumed =
                self.params.auto_resume && state.was_running_before_emergency && !state.halted;
            if resumed {
                state.running = true;
                state.was_running_before_emergency = false;
            }

            info!(
                "Emergency stop cleared{}",
                if resumed { ", resuming" } else { "" }
            );
            self.emit(ArbiterEvent::EmergencyCleared { resumed }, &state, now_s);
        }

        Applied::Changed
    }

    pub fn apply_speed(&self, value: &str, now_s: f64) -> Result<Applied, TcParseError> {
        let speed_pct = parse_speed(value).map_err(|e| {
            warn!("Speed rejected: {}", e);
            e
        })?;

        let mut state = self.lock();
        if speed_pct == state.speed_pct {
            return Ok(Applied::Unchanged);
        }

        let from = state.speed_pct;
        state.speed_pct = speed_pct;
        info!("Speed: {} % -> {} %", from, speed_pct);
        self.emit(ArbiterEvent::Speed { from, to: speed_pct }, &state, now_s);

        Ok(Applied::Changed)
    }

    pub fn apply_mode(&self, value: &str, now_s: f64) -> Applied {
        let mode = parse_mode(value);

        let mut state = self.lock();
        if mode == state.mode {
            return Applied::Unchanged;
        }

        let from = state.mode;
        state.mode = mode;
        info!("Mode: {} -> {}", from.name(), mode.name());
        self.emit(ArbiterEvent::Mode { from, to: mode }, &state, now_s);

        Applied::Changed
    }

    /// Record a line position. The timestamp is refreshed even if the position is unchanged.
    pub fn apply_line_input(&self, value: &str, now_s: f64) -> Result<Applied, TcParseError> {
        let line = parse_line(value).map_err(|e| {
            warn!("Line reading rejected: {}", e);
            e
        })?;

        Ok(self.record_line(line, now_s))
    }

    /// Record a distance reading. The timestamp is refreshed even if the distance is unchanged.
    pub fn apply_distance_input(&self, value: &str, now_s: f64) -> Result<Applied, TcParseError> {
        let distance_cm = parse_distance(value).map_err(|e| {
            warn!("Distance reading rejected: {}", e);
            e
        })?;

        Ok(self.record_distance(distance_cm, now_s))
    }

    pub fn record_line(&self, line: LineState, now_s: f64) -> Applied {
        let mut state = self.lock();
        let changed = state.last_line != Some(line);

        state.last_line = Some(line);
        state.last_line_s = Some(now_s);

        if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    pub fn record_distance(&self, distance_cm: u32, now_s: f64) -> Applied {
        let mut state = self.lock();
        let changed = state.last_distance_cm != Some(distance_cm);

        state.last_distance_cm = Some(distance_cm);
        state.last_distance_s = Some(now_s);

        if changed {
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    /// Write a motor command if the vehicle may move, otherwise write zero.
    ///
    /// Returns `true` if the command was written. The check and the write happen under the state
    /// lock, so an emergency stop can't slip in between them.
    pub fn drive(&self, cmd: &MotorCommand) -> bool {
        let mut state = self.lock();

        if state.may_move() {
            self.write(&mut state, cmd.duties);
            true
        } else {
            self.write(&mut state, ZERO_DUTIES);
            false
        }
    }

    /// Zero the motors and wait for them to settle.
    pub fn force_stop(&self) {
        self.zero(&mut self.lock());
        self.output.settle();
    }

    /// Stop the vehicle for good. Returns `true` the first time it is called.
    pub fn halt(&self) -> bool {
        let mut state = self.lock();
        let first = !state.halted;

        state.halted = true;
        state.running = false;
        self.zero(&mut state);

        drop(state);
        self.output.settle();

        first
    }

    /// Close the actuator. Only the first call reaches the device.
    pub fn release_actuator(&self) -> bool {
        self.output.release()
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> VehicleState {
        self.lock().clone()
    }

    pub fn may_move(&self) -> bool {
        self.lock().may_move()
    }

    fn write(&self, state: &mut VehicleState, duties: Duties) {
        self.output.apply(duties);
        state.last_duties = duties;
    }

    /// Zero the motors. Callers wait out the settle after releasing the state lock, so other
    /// commands aren't held up by it.
    fn zero(&self, state: &mut VehicleState) {
        self.write(state, ZERO_DUTIES);
    }

    fn emit(&self, event: ArbiterEvent, state: &VehicleState, now_s: f64) {
        for sink in self.sinks.iter() {
            sink.on_event(&event, state, now_s);
        }
    }

    fn lock(&self) -> MutexGuard<'_, VehicleState> {
        // The state is always consistent between statements, so a panic elsewhere doesn't taint it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
