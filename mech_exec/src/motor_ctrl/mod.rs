//! # Motor Controller Module
//!
//! This module provides a unified motor control interface which can abstract over different types
//! of PWM driver boards.
//!
//! Each wheel motor is driven through an H-bridge fed by a pair of PWM channels, one for each
//! direction. A signed duty sets the channel for its direction to `|duty|` and the other to zero,
//! a zero duty sets both to zero.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`PwmDriver`] implementation for the PCA9685 16 channel PWM driver board.
pub mod pca9685;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Deserialize;

use comms_if::eqpt::mech::{MechDems, MechDemsResponse, MAX_DUTY};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of channels on a driver board.
pub const NUM_CHANNELS: u8 = 16;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing PWM driver boards.
pub trait PwmDriver {
    /// Set the on time of a channel.
    ///
    /// ## Arguments
    /// - `channel` - The channel to set, below [`NUM_CHANNELS`]
    /// - `value` - The on time, between 0 and [`MAX_DUTY`]. Values outside this range will be
    ///   rejected.
    fn set_channel(&mut self, channel: u8, value: u16) -> Result<(), MotorError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The pair of channels driving one motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChannelPair {
    pub forward: u8,
    pub reverse: u8,
}

/// Drives the wheel motors from [`MechDems`].
pub struct MotorCtrl<D: PwmDriver> {
    driver: D,

    /// Channels of each motor, in the order duties are carried in the demands
    channels: [ChannelPair; 4],

    /// While in safe mode the motors are stopped and stay stopped until the next valid demand
    safe_mode: bool,
}

/// A driver board which only remembers what it was told.
#[derive(Debug, Default)]
pub struct SimBoard {
    values: [u16; NUM_CHANNELS as usize],
    num_writes: usize,
    faulty: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MotorError {
    #[error("An I2C error occured")]
    I2c,

    #[error("Channel {0} does not exist")]
    InvalidChannel(u8),

    #[error("Value {0} is out of range for a channel")]
    InvalidValue(u16),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ChannelPair {
    pub const fn new(forward: u8, reverse: u8) -> Self {
        Self { forward, reverse }
    }
}

impl<D: PwmDriver> MotorCtrl<D> {
    /// Create a new motor controller, starting in safe mode with every motor stopped.
    pub fn new(driver: D, channels: [ChannelPair; 4]) -> Result<Self, MotorError> {
        let mut ctrl = Self {
            driver,
            channels,
            safe_mode: true,
        };

        ctrl.stop()?;

        Ok(ctrl)
    }

    pub fn is_safe(&self) -> bool {
        self.safe_mode
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Validate and actuate a set of demands, returning the response for the client.
    pub fn handle_demands(&mut self, dems: &MechDems) -> MechDemsResponse {
        if !dems.is_valid() {
            warn!("Rejecting out of range demands {:?}", dems.duty);
            return MechDemsResponse::DemsInvalid;
        }

        match self.actuate(dems) {
            Ok(()) => {
                if self.safe_mode {
                    info!("Recieved valid demand, exiting safe mode");
                    self.safe_mode = false;
                }
                MechDemsResponse::DemsOk
            }
            Err(e) => {
                warn!("Could not actuate demands: {}", e);
                self.enter_safe_mode();
                MechDemsResponse::EqptInvalid
            }
        }
    }

    /// Stop every motor, once. Further calls while in safe mode do nothing.
    pub fn enter_safe_mode(&mut self) {
        if self.safe_mode {
            return;
        }

        warn!("Entering safe mode");
        self.safe_mode = true;

        if let Err(e) = self.stop() {
            warn!("Could not stop the motors: {}", e);
        }
    }

    /// Set both channels of every motor to zero.
    pub fn stop(&mut self) -> Result<(), MotorError> {
        for pair in self.channels.iter() {
            self.driver.set_channel(pair.forward, 0)?;
            self.driver.set_channel(pair.reverse, 0)?;
        }

        Ok(())
    }

    fn actuate(&mut self, dems: &MechDems) -> Result<(), MotorError> {
        for ((id, duty), pair) in dems.iter().zip(self.channels.iter()) {
            let value = duty.unsigned_abs().min(MAX_DUTY as u32) as u16;

            // Clear the opposite direction first so both are never on together
            let (on, off) = if duty < 0 {
                (pair.reverse, pair.forward)
            } else {
                (pair.forward, pair.reverse)
            };

            self.driver.set_channel(off, 0)?;
            self.driver.set_channel(on, value)?;

            debug!("{:?}: duty {}", id, duty);
        }

        Ok(())
    }
}

impl SimBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, channel: u8) -> u16 {
        self.values[channel as usize]
    }

    pub fn num_writes(&self) -> usize {
        self.num_writes
    }

    pub fn set_faulty(&mut self, faulty: bool) {
        self.faulty = faulty;
    }
}

impl PwmDriver for SimBoard {
    fn set_channel(&mut self, channel: u8, value: u16) -> Result<(), MotorError> {
        if self.faulty {
            return Err(MotorError::I2c);
        }
        check_channel(channel, value)?;

        self.values[channel as usize] = value;
        self.num_writes += 1;

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn check_channel(channel: u8, value: u16) -> Result<(), MotorError> {
    if channel >= NUM_CHANNELS {
        return Err(MotorError::InvalidChannel(channel));
    }
    if value as i32 > MAX_DUTY {
        return Err(MotorError::InvalidValue(value));
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
