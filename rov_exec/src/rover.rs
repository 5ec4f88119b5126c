//! # Rover control cycle
//!
//! One [`Rover::tick`] is one pass of the control loop:
//!
//! 1. Apply any scripted commands which have come due
//! 2. Read the local sensors
//! 3. Decide what the motors should do from a snapshot of the vehicle state
//! 4. Drive the motors, running a manoeuvre to completion if one was decided on
//! 5. Keep the status feeds and telemetry archive up to date
//!
//! Operator commands are not handled here, they are applied by the telecommand client thread as
//! soon as they arrive.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::sync::Arc;

use util::{
    module::State,
    script_interpreter::{PendingTcs, ScriptInterpreter},
    time::Clock,
};

use crate::{
    arbiter::Arbiter,
    drive::{manoeuvre, Decision, DriveCtrl, DriveInput, DriveStatus},
    sensors::SensorSuite,
    telemetry::{StatusReporter, TelemetryLogger},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Rover {
    arbiter: Arc<Arbiter>,
    drive: DriveCtrl,
    sensors: SensorSuite,
    script: Option<Script>,
    status: StatusReporter,
    telemetry: Arc<TelemetryLogger>,
    clock: Arc<dyn Clock>,

    last_status: Option<DriveStatus>,
}

/// A script being played back, with script time zero at `start_s`.
struct Script {
    interpreter: ScriptInterpreter,
    start_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,

    /// The script has no commands left, the run should end
    EndOfScript,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Rover {
    pub fn new(
        arbiter: Arc<Arbiter>,
        drive: DriveCtrl,
        sensors: SensorSuite,
        status: StatusReporter,
        telemetry: Arc<TelemetryLogger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            arbiter,
            drive,
            sensors,
            script: None,
            status,
            telemetry,
            clock,
            last_status: None,
        }
    }

    /// Play back `interpreter`, with script time starting now.
    pub fn with_script(mut self, interpreter: ScriptInterpreter) -> Self {
        info!(
            "Script loaded with {} commands over {:.1} s",
            interpreter.get_num_tcs(),
            interpreter.get_duration()
        );

        self.script = Some(Script {
            interpreter,
            start_s: self.clock.now_s(),
        });
        self
    }

    /// Publish the online heartbeat. Call once before the first tick.
    pub fn announce_online(&mut self) {
        self.status.announce_online(self.clock.now_s());
    }

    pub fn tick(&mut self) -> TickFlow {
        let now_s = self.clock.now_s();

        // ---- SCRIPTED COMMANDS ----

        if let Some(script) = self.script.as_mut() {
            match script.interpreter.get_pending_tcs(now_s - script.start_s) {
                PendingTcs::None => (),
                PendingTcs::Some(tcs) => {
                    for tc in tcs {
                        debug!("Scripted command: {:?}", tc);
                        // Rejections are logged by the arbiter
                        self.arbiter.apply(&tc, now_s).ok();
                    }
                }
                PendingTcs::EndOfScript => {
                    info!("End of script reached");
                    return TickFlow::EndOfScript;
                }
            }
        }

        // ---- SENSING ----

        self.sensors.poll(&self.arbiter, now_s);

        // ---- DRIVE DECISION ----

        let input = DriveInput {
            state: self.arbiter.snapshot(),
            now_s,
        };

        match self.drive.proc(&input) {
            Ok((decision, status)) => {
                if self.last_status != Some(status) {
                    info!("Drive status: {}", status.name());
                    self.last_status = Some(status);
                }

                match decision {
                    Decision::Drive(cmd) => {
                        self.arbiter.drive(&cmd);
                    }
                    Decision::Manoeuvre(steps) => {
                        let outcome =
                            manoeuvre::execute(&steps, &self.arbiter, self.clock.as_ref());
                        debug!("Manoeuvre outcome: {:?}", outcome);
                    }
                }
            }
            Err(e) => {
                warn!("Drive processing failed, stopping: {}", e);
                self.arbiter.force_stop();
            }
        }

        // ---- STATUS AND TELEMETRY ----

        // Time has moved on if a manoeuvre ran
        let now_s = self.clock.now_s();
        let state = self.arbiter.snapshot();

        self.status.tick(now_s, state.last_duties);
        self.telemetry.maybe_log(&state, now_s);

        TickFlow::Continue
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::actuator::{MotorOutput, SimActuator, ZERO_DUTIES};
    use crate::arbiter::ArbiterParams;
    use crate::drive::{pct_to_duty, DriveParams};
    use crate::publisher::{PublisherParams, RateLimitedPublisher};
    use crate::telemetry::StatusParams;
    use comms_if::{
        feeds::{FeedKeys, FeedNamer, FeedTable},
        net::mem::MemBroker,
    };
    use std::time::Duration;
    use util::time::ManualClock;

    struct Rig {
        rover: Rover,
        arbiter: Arc<Arbiter>,
        sim: Arc<SimActuator>,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn rig(sensors: SensorSuite) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let sim = Arc::new(SimActuator::new());

        let output = MotorOutput::new(sim.clone(), 1, Duration::ZERO, clock.clone());
        let arbiter = Arc::new(Arbiter::new(ArbiterParams::default(), output));

        let mut drive = DriveCtrl::default();
        drive.init(DriveParams::default()).unwrap();

        let broker = MemBroker::new();
        let publisher = Arc::new(RateLimitedPublisher::new(
            Box::new(broker.publisher(None)),
            PublisherParams::default(),
            clock.clone(),
        ));
        let feeds = FeedTable::new(&FeedNamer::new("u", "smartpath"), &FeedKeys::default());
        let status = StatusReporter::new(publisher, &feeds, StatusParams::default());

        let telemetry = Arc::new(
            TelemetryLogger::new(
                dir.path(),
                1.0,
                util::retry::RetryPolicy::new(1, 0),
                clock.clone(),
            )
            .unwrap(),
        );

        let rover = Rover::new(
            arbiter.clone(),
            drive,
            sensors,
            status,
            telemetry,
            clock.clone(),
        );

        Rig {
            rover,
            arbiter,
            sim,
            clock,
            _dir: dir,
        }
    }

    #[test]
    fn test_manual_drive() {
        let mut r = rig(SensorSuite::default());

        assert_eq!(r.rover.tick(), TickFlow::Continue);
        assert_eq!(r.sim.last(), Some(ZERO_DUTIES));

        r.arbiter.apply_start_stop("on", 0.0);
        r.rover.tick();
        assert_eq!(r.sim.last(), Some([pct_to_duty(35.0, 4095); 4]));
    }

    #[test]
    fn test_script_playback() {
        let mut r = rig(SensorSuite::default());
        let script = ScriptInterpreter::parse("0.0: speed 50;\n0.5: startstop on;\n").unwrap();
        r.rover = r.rover.with_script(script);

        r.rover.tick();
        assert_eq!(r.arbiter.snapshot().speed_pct, 50);
        assert!(!r.arbiter.snapshot().running);

        r.clock.advance(0.6);
        r.rover.tick();
        assert!(r.arbiter.snapshot().running);

        r.clock.advance(0.6);
        assert_eq!(r.rover.tick(), TickFlow::EndOfScript);
    }

    #[test]
    fn test_avoid_with_stale_distance_stops() {
        let mut r = rig(SensorSuite::default());
        r.arbiter.apply_mode("avoid", 0.0);
        r.arbiter.apply_start_stop("on", 0.0);

        r.rover.tick();
        assert_eq!(r.sim.last(), Some(ZERO_DUTIES));

        // Fresh and clear
        r.arbiter.record_distance(100, r.clock.now_s());
        r.rover.tick();
        assert_eq!(r.sim.last(), Some([pct_to_duty(35.0, 4095); 4]));
    }
}
