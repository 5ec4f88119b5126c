//! # Manoeuvre executor
//!
//! Runs a sequence of timed [`Step`]s. Each step is written through the arbiter and then held.
//! Holds are sliced so that an emergency stop, or anything else which stops the vehicle, ends the
//! manoeuvre within one slice rather than at the end of the step.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info};
use std::time::Duration;

use util::time::Clock;

use super::Step;
use crate::arbiter::Arbiter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Longest time between two checks of the vehicle state during a hold.
pub const HOLD_SLICE: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManoeuvreOutcome {
    Completed,

    /// The vehicle was stopped during the step with this index
    Cancelled { step: usize },
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Run `steps` to completion or until the vehicle may no longer move.
///
/// A cancelled manoeuvre leaves the motors zeroed.
pub fn execute(steps: &[Step], arbiter: &Arbiter, clock: &dyn Clock) -> ManoeuvreOutcome {
    for (i, step) in steps.iter().enumerate() {
        debug!("Manoeuvre step {}: {}", i, step.label);

        if !arbiter.drive(&step.cmd) || !hold(step.hold, arbiter, clock) {
            info!("Manoeuvre cancelled during step {} ({})", i, step.label);
            arbiter.force_stop();
            return ManoeuvreOutcome::Cancelled { step: i };
        }
    }

    ManoeuvreOutcome::Completed
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Wait for `duration`, returning `false` as soon as the vehicle may no longer move.
fn hold(duration: Duration, arbiter: &Arbiter, clock: &dyn Clock) -> bool {
    let mut remaining = duration;

    while !remaining.is_zero() {
        let slice = remaining.min(HOLD_SLICE);
        clock.sleep(slice);
        remaining -= slice;

        if !arbiter.may_move() {
            return false;
        }
    }

    true
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::actuator::{MotorOutput, SimActuator, ZERO_DUTIES};
    use crate::arbiter::ArbiterParams;
    use crate::drive::MotorCommand;
    use std::sync::{Arc, Mutex};
    use util::time::ManualClock;

    type Action = Box<dyn FnOnce() + Send>;

    /// A manual clock which runs an action once time passes a trigger point.
    struct TriggerClock {
        inner: ManualClock,
        at_s: f64,
        action: Mutex<Option<Action>>,
    }

    impl Clock for TriggerClock {
        fn now_s(&self) -> f64 {
            self.inner.now_s()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);

            if self.inner.now_s() >= self.at_s {
                let action = self.action.lock().unwrap().take();
                if let Some(a) = action {
                    a();
                }
            }
        }
    }

    fn steps() -> Vec<Step> {
        vec![
            Step {
                label: "stop",
                cmd: MotorCommand::zero(),
                hold: Duration::from_millis(150),
            },
            Step {
                label: "reverse",
                cmd: MotorCommand::uniform(-1000),
                hold: Duration::from_millis(400),
            },
            Step {
                label: "turn",
                cmd: MotorCommand::sides(1000, -1000),
                hold: Duration::from_millis(350),
            },
            Step {
                label: "stop",
                cmd: MotorCommand::zero(),
                hold: Duration::ZERO,
            },
        ]
    }

    fn setup(trigger_s: f64) -> (Arc<Arbiter>, Arc<SimActuator>, Arc<TriggerClock>) {
        let sim = Arc::new(SimActuator::new());
        let clock = Arc::new(TriggerClock {
            inner: ManualClock::default(),
            at_s: trigger_s,
            action: Mutex::new(None),
        });
        let output = MotorOutput::new(sim.clone(), 1, Duration::from_millis(50), clock.clone());
        let arbiter = Arc::new(Arbiter::new(ArbiterParams::default(), output));
        arbiter.apply_start_stop("on", 0.0);

        (arbiter, sim, clock)
    }

    #[test]
    fn test_completes() {
        let (arbiter, sim, clock) = setup(f64::INFINITY);

        assert_eq!(
            execute(&steps(), &arbiter, clock.as_ref()),
            ManoeuvreOutcome::Completed
        );
        assert_eq!(
            sim.writes(),
            vec![
                ZERO_DUTIES,
                [-1000; 4],
                [1000, -1000, 1000, -1000],
                ZERO_DUTIES
            ]
        );
        assert!((clock.now_s() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_during_reverse() {
        let (arbiter, sim, clock) = setup(0.3);

        let arb = arbiter.clone();
        *clock.action.lock().unwrap() = Some(Box::new(move || {
            arb.apply_emergency("on", 0.3);
        }));

        assert_eq!(
            execute(&steps(), &arbiter, clock.as_ref()),
            ManoeuvreOutcome::Cancelled { step: 1 }
        );

        // The emergency zeroed the motors and the turn never happened
        let writes = sim.writes();
        assert_eq!(writes.last(), Some(&ZERO_DUTIES));
        assert!(!writes.contains(&[1000, -1000, 1000, -1000]));

        // Cancelled within one slice of the emergency
        assert!(clock.now_s() < 0.3 + HOLD_SLICE.as_secs_f64() + 0.2);
    }

    #[test]
    fn test_not_started_when_stopped() {
        let (arbiter, sim, clock) = setup(f64::INFINITY);
        arbiter.apply_start_stop("off", 0.0);
        let before = sim.writes().len();

        assert_eq!(
            execute(&steps(), &arbiter, clock.as_ref()),
            ManoeuvreOutcome::Cancelled { step: 0 }
        );
        assert!(sim.writes()[before..].iter().all(|w| *w == ZERO_DUTIES));
    }
}
