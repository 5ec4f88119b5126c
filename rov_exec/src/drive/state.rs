//! Drive engine state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::Duration;

use comms_if::tc::drive::{DriveMode, LineState};
use util::{module::State, time};

use super::{pct_to_duty, Decision, DriveError, DriveParams, DriveStatus, MotorCommand, Step};
use crate::arbiter::VehicleState;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The drive engine.
#[derive(Debug, Default)]
pub struct DriveCtrl {
    params: Option<DriveParams>,
}

/// Input to one cycle of the drive engine.
#[derive(Debug, Clone)]
pub struct DriveInput {
    pub state: VehicleState,

    /// Units: seconds
    pub now_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State for DriveCtrl {
    type InitData = DriveParams;
    type InitError = DriveError;

    type InputData = DriveInput;
    type OutputData = Decision;
    type StatusReport = DriveStatus;
    type ProcError = DriveError;

    fn init(&mut self, params: Self::InitData) -> Result<(), Self::InitError> {
        if params.obstacle_near_cm >= params.obstacle_far_cm {
            return Err(DriveError::InvalidParams(format!(
                "near threshold ({} cm) must be below far threshold ({} cm)",
                params.obstacle_near_cm, params.obstacle_far_cm
            )));
        }
        if params.max_duty <= 0 {
            return Err(DriveError::InvalidParams(format!(
                "max duty must be positive, got {}",
                params.max_duty
            )));
        }

        self.params = Some(params);
        Ok(())
    }

    fn proc(
        &mut self,
        input: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let params = self.params.as_ref().ok_or(DriveError::NotInitialised)?;
        let state = &input.state;

        if !state.may_move() {
            return Ok((Decision::Drive(MotorCommand::zero()), DriveStatus::Stopped));
        }

        let duty = pct_to_duty(state.speed_pct as f64, params.max_duty);

        match state.mode {
            DriveMode::Manual => Ok((
                Decision::Drive(MotorCommand::uniform(duty)),
                DriveStatus::Manual,
            )),
            DriveMode::Avoid => Ok(avoid(params, state, input.now_s, duty)),
            DriveMode::LineFollow => Ok(line_follow(params, state, input.now_s)),
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn avoid(
    params: &DriveParams,
    state: &VehicleState,
    now_s: f64,
    duty: i32,
) -> (Decision, DriveStatus) {
    let distance_cm = match state.fresh_distance(now_s, params.sensor_stale_s) {
        Some(d) => d,
        None => return (Decision::Drive(MotorCommand::zero()), DriveStatus::DistanceStale),
    };

    if distance_cm < params.obstacle_near_cm {
        (
            Decision::Manoeuvre(back_away(params, duty, true)),
            DriveStatus::Obstacle,
        )
    } else if distance_cm < params.obstacle_far_cm {
        let half = pct_to_duty(state.speed_pct as f64 / 2.0, params.max_duty);
        (
            Decision::Drive(MotorCommand::uniform(half)),
            DriveStatus::Slow,
        )
    } else {
        (
            Decision::Drive(MotorCommand::uniform(duty)),
            DriveStatus::Clear,
        )
    }
}

fn line_follow(params: &DriveParams, state: &VehicleState, now_s: f64) -> (Decision, DriveStatus) {
    // Without a recent distance there is no telling what is ahead
    let distance_cm = match state.fresh_distance(now_s, params.sensor_stale_s) {
        Some(d) => d,
        None => return (Decision::Drive(MotorCommand::zero()), DriveStatus::DistanceStale),
    };

    let base = pct_to_duty(params.line_follow_speed_pct as f64, params.max_duty);

    if distance_cm <= params.obstacle_near_cm {
        return (
            Decision::Manoeuvre(back_away(params, base, false)),
            DriveStatus::Obstacle,
        );
    }

    // An old line position is still good enough to steer by
    let line = state.last_line.unwrap_or(LineState::Center);
    let reduced = scale(base, params.line_turn_ratio);

    let cmd = match line {
        LineState::Center => MotorCommand::uniform(base),
        LineState::Left => MotorCommand::sides(reduced, base),
        LineState::Right => MotorCommand::sides(base, reduced),
        LineState::Unknown => {
            return (
                Decision::Drive(MotorCommand::uniform(scale(
                    base,
                    params.line_search_ratio,
                ))),
                DriveStatus::LineSearch,
            )
        }
    };

    (Decision::Drive(cmd), DriveStatus::OnLine(line))
}

/// Stop, reverse, stop and, if `turn`, pivot away before stopping again.
fn back_away(params: &DriveParams, duty: i32, turn: bool) -> Vec<Step> {
    let pause = time::millis(params.pause_ms);

    let mut steps = vec![
        Step {
            label: "stop",
            cmd: MotorCommand::zero(),
            hold: pause,
        },
        Step {
            label: "reverse",
            cmd: MotorCommand::uniform(-duty),
            hold: time::millis(params.reverse_ms),
        },
        Step {
            label: "stop",
            cmd: MotorCommand::zero(),
            hold: if turn { pause } else { Duration::ZERO },
        },
    ];

    if turn {
        steps.push(Step {
            label: "turn",
            cmd: MotorCommand::sides(duty, -duty),
            hold: time::millis(params.turn_ms),
        });
        steps.push(Step {
            label: "stop",
            cmd: MotorCommand::zero(),
            hold: Duration::ZERO,
        });
    }

    steps
}

fn scale(duty: i32, ratio: f64) -> i32 {
    (duty as f64 * ratio).round() as i32
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn ctrl() -> DriveCtrl {
        let mut ctrl = DriveCtrl::default();
        ctrl.init(DriveParams::default()).unwrap();
        ctrl
    }

    fn running(mode: DriveMode, speed_pct: u8) -> VehicleState {
        let mut state = VehicleState::new(speed_pct);
        state.running = true;
        state.mode = mode;
        state
    }

    fn with_distance(mut state: VehicleState, cm: u32, at_s: f64) -> VehicleState {
        state.last_distance_cm = Some(cm);
        state.last_distance_s = Some(at_s);
        state
    }

    fn run(ctrl: &mut DriveCtrl, state: VehicleState, now_s: f64) -> (Decision, DriveStatus) {
        ctrl.proc(&DriveInput { state, now_s }).unwrap()
    }

    #[test]
    fn test_uninitialised() {
        let mut ctrl = DriveCtrl::default();
        assert!(matches!(
            ctrl.proc(&DriveInput {
                state: VehicleState::new(0),
                now_s: 0.0
            }),
            Err(DriveError::NotInitialised)
        ));

        let mut bad = DriveParams::default();
        bad.obstacle_near_cm = 100;
        assert!(ctrl.init(bad).is_err());
    }

    #[test]
    fn test_manual() {
        let mut ctrl = ctrl();

        let (decision, status) = run(&mut ctrl, running(DriveMode::Manual, 40), 0.0);
        assert_eq!(decision, Decision::Drive(MotorCommand::uniform(1638)));
        assert_eq!(status, DriveStatus::Manual);
    }

    #[test]
    fn test_stopped_when_not_allowed() {
        let mut ctrl = ctrl();

        for mode in [DriveMode::Manual, DriveMode::Avoid, DriveMode::LineFollow] {
            let mut state = with_distance(running(mode, 80), 100, 0.0);
            state.emergency_active = true;

            let (decision, status) = run(&mut ctrl, state, 0.0);
            assert_eq!(decision, Decision::Drive(MotorCommand::zero()));
            assert_eq!(status, DriveStatus::Stopped);
        }
    }

    #[test]
    fn test_avoid() {
        let mut ctrl = ctrl();
        let state = running(DriveMode::Avoid, 50);

        let (d, s) = run(&mut ctrl, state.clone(), 5.0);
        assert_eq!(d, Decision::Drive(MotorCommand::zero()));
        assert_eq!(s, DriveStatus::DistanceStale);

        let (d, s) = run(&mut ctrl, with_distance(state.clone(), 100, 5.0), 5.0);
        assert_eq!(d, Decision::Drive(MotorCommand::uniform(2048)));
        assert_eq!(s, DriveStatus::Clear);

        let (d, s) = run(&mut ctrl, with_distance(state.clone(), 30, 5.0), 5.0);
        assert_eq!(d, Decision::Drive(MotorCommand::uniform(1024)));
        assert_eq!(s, DriveStatus::Slow);

        let (d, s) = run(&mut ctrl, with_distance(state, 10, 5.0), 5.0);
        assert_eq!(s, DriveStatus::Obstacle);
        match d {
            Decision::Manoeuvre(steps) => {
                let labels: Vec<_> = steps.iter().map(|s| s.label).collect();
                assert_eq!(labels, vec!["stop", "reverse", "stop", "turn", "stop"]);
                assert_eq!(steps[1].cmd, MotorCommand::uniform(-2048));
                assert_eq!(steps[1].hold, Duration::from_millis(400));
                assert_eq!(steps[3].cmd, MotorCommand::sides(2048, -2048));
                assert_eq!(steps[3].hold, Duration::from_millis(350));
            }
            other => panic!("expected a manoeuvre, got {:?}", other),
        }
    }

    #[test]
    fn test_line_follow_needs_fresh_distance() {
        let mut ctrl = ctrl();
        let params = DriveParams::default();

        for line in [LineState::Left, LineState::Center, LineState::Unknown] {
            let mut state = with_distance(running(DriveMode::LineFollow, 50), 100, 0.0);
            state.last_line = Some(line);

            let (d, s) = run(&mut ctrl, state, params.sensor_stale_s + 1.0);
            assert_eq!(d, Decision::Drive(MotorCommand::zero()));
            assert_eq!(s, DriveStatus::DistanceStale);
        }
    }

    #[test]
    fn test_line_follow() {
        let mut ctrl = ctrl();
        let base = pct_to_duty(30.0, 4095);
        let reduced = (base as f64 * 0.3).round() as i32;
        let state = with_distance(running(DriveMode::LineFollow, 50), 100, 10.0);

        // An unknown position counts as centred
        let (d, s) = run(&mut ctrl, state.clone(), 10.0);
        assert_eq!(d, Decision::Drive(MotorCommand::uniform(base)));
        assert_eq!(s, DriveStatus::OnLine(LineState::Center));

        let mut left = state.clone();
        left.last_line = Some(LineState::Left);
        let (d, _) = run(&mut ctrl, left, 10.0);
        assert_eq!(d, Decision::Drive(MotorCommand::sides(reduced, base)));

        let mut right = state.clone();
        right.last_line = Some(LineState::Right);
        right.last_line_s = Some(0.0);
        let (d, _) = run(&mut ctrl, right, 10.0);
        assert_eq!(d, Decision::Drive(MotorCommand::sides(base, reduced)));

        let mut lost = state.clone();
        lost.last_line = Some(LineState::Unknown);
        let (d, s) = run(&mut ctrl, lost, 10.0);
        assert_eq!(
            d,
            Decision::Drive(MotorCommand::uniform((base as f64 * 0.5).round() as i32))
        );
        assert_eq!(s, DriveStatus::LineSearch);

        // The stop threshold is inclusive and there is no turn
        let (d, s) = run(&mut ctrl, with_distance(state, 20, 10.0), 10.0);
        assert_eq!(s, DriveStatus::Obstacle);
        match d {
            Decision::Manoeuvre(steps) => {
                assert_eq!(steps.len(), 3);
                assert_eq!(steps[1].cmd, MotorCommand::uniform(-base));
            }
            other => panic!("expected a manoeuvre, got {:?}", other),
        }
    }
}
