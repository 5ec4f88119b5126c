//! # Mechanisms Equipment Commands

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest duty magnitude the motor driver board accepts (12 bit PWM).
pub const MAX_DUTY: i32 = 4095;

/// Drive actuators in the order duties are carried in [`MechDems::duty`].
pub const DRV_IDS: [ActId; 4] = [ActId::DrvFL, ActId::DrvFR, ActId::DrvRL, ActId::DrvRR];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Demands that are sent from the MechClient to the MechServer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MechDems {
    /// Signed duty of each drive motor, ordered as [`DRV_IDS`]. Positive is the motor's own
    /// forward direction, polarity correction is the client's job.
    pub duty: [i32; 4],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// IDs of all actuators available to the vehicle
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum ActId {
    DrvFL,
    DrvFR,
    DrvRL,
    DrvRR,
}

/// Response from the mechanisms server based on the demands sent by the client.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum MechDemsResponse {
    /// Demands were valid and will be executed
    DemsOk,

    /// Demands were invalid and have been rejected
    DemsInvalid,

    /// Equipment is invalid so demands cannot be actuated
    EqptInvalid,
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl MechDems {
    pub fn new(duty: [i32; 4]) -> Self {
        Self { duty }
    }

    /// Demands that stop every motor.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Return true if every duty is within the board's range.
    pub fn is_valid(&self) -> bool {
        self.duty.iter().all(|d| d.abs() <= MAX_DUTY)
    }

    /// Pairs of actuator ID and duty.
    pub fn iter(&self) -> impl Iterator<Item = (ActId, i32)> + '_ {
        DRV_IDS.iter().copied().zip(self.duty.iter().copied())
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
