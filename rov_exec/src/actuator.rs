//! # Actuator output
//!
//! The vehicle drives four wheel motors. Everything above this module speaks in *logical* duties,
//! where a positive value always means forward. [`MotorOutput`] maps these onto the physical
//! polarity of the wiring and is the only place an [`Actuator`] is written.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use util::time::Clock;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of driven wheels.
pub const NUM_MOTORS: usize = 4;

/// All motors stopped.
pub const ZERO_DUTIES: Duties = [0; NUM_MOTORS];

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Duty of each motor, in the order front left, front right, rear left, rear right.
pub type Duties = [i32; NUM_MOTORS];

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A device which can set the duty of the wheel motors.
pub trait Actuator: Send + Sync {
    /// Set the physical duty of every motor.
    fn set_motor_duty(&self, duties: Duties) -> Result<(), ActuatorError>;

    /// Release the device. Writes after closing fail with [`ActuatorError::Closed`].
    fn close(&self) -> Result<(), ActuatorError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("The actuator has been closed")]
    Closed,

    #[error("Actuator fault: {0}")]
    Fault(String),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Writes logical duties to an [`Actuator`], applying the wiring polarity.
pub struct MotorOutput {
    actuator: Arc<dyn Actuator>,

    /// Physical sign of a forward duty, either `1` or `-1`
    forward_sign: i32,

    /// Time to let the motors spin down after a stop
    settle: Duration,

    clock: Arc<dyn Clock>,

    released: AtomicBool,
}

/// An actuator which only records what it is asked to do.
#[derive(Default)]
pub struct SimActuator {
    inner: Mutex<SimInner>,
}

#[derive(Default)]
struct SimInner {
    writes: Vec<Duties>,
    close_calls: usize,
    closed: bool,
    faulty: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotorOutput {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        forward_sign: i32,
        settle: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            actuator,
            forward_sign: if forward_sign < 0 { -1 } else { 1 },
            settle,
            clock,
            released: AtomicBool::new(false),
        }
    }

    /// Map logical duties to physical ones.
    ///
    /// A negative logical duty is a reverse and so always has the opposite physical sign to a
    /// forward duty, whichever way round the motors are wired.
    pub fn to_physical(&self, duties: Duties) -> Duties {
        duties.map(|d| d * self.forward_sign)
    }

    /// Write logical duties, returning `true` if the actuator accepted them.
    ///
    /// Faults are logged rather than returned, the caller has no better recovery than trying
    /// again next cycle.
    pub fn apply(&self, duties: Duties) -> bool {
        match self.actuator.set_motor_duty(self.to_physical(duties)) {
            Ok(()) => true,
            Err(ActuatorError::Closed) => {
                debug!("Actuator closed, duties {:?} not written", duties);
                false
            }
            Err(e) => {
                warn!("Could not write duties {:?}: {}", duties, e);
                false
            }
        }
    }

    /// Zero every motor and wait for them to settle.
    ///
    /// A closed actuator is already stopped so this is safe to call at any point.
    pub fn stop(&self) {
        self.apply(ZERO_DUTIES);
        self.settle();
    }

    /// Wait for the motors to come to rest after a zero write.
    pub fn settle(&self) {
        self.clock.sleep(self.settle);
    }

    /// Close the actuator. Only the first call reaches the device.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.actuator.close() {
            Ok(()) => info!("Actuator released"),
            Err(e) => warn!("Error releasing the actuator: {}", e),
        }

        true
    }
}

impl SimActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every physical write accepted so far.
    pub fn writes(&self) -> Vec<Duties> {
        self.lock().writes.clone()
    }

    /// The most recent accepted write.
    pub fn last(&self) -> Option<Duties> {
        self.lock().writes.last().copied()
    }

    /// Number of times `close` has been called.
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Make every following write fail with a fault.
    pub fn set_faulty(&self, faulty: bool) {
        self.lock().faulty = faulty;
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Actuator for SimActuator {
    fn set_motor_duty(&self, duties: Duties) -> Result<(), ActuatorError> {
        let mut inner = self.lock();

        if inner.closed {
            return Err(ActuatorError::Closed);
        }
        if inner.faulty {
            return Err(ActuatorError::Fault(String::from("simulated fault")));
        }

        inner.writes.push(duties);
        Ok(())
    }

    fn close(&self) -> Result<(), ActuatorError> {
        let mut inner = self.lock();
        inner.close_calls += 1;
        inner.closed = true;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
