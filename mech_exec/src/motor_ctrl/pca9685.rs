//! [`PwmDriver`] implementation for the PCA9685 driver

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use embedded_hal::blocking::i2c::{Write, WriteRead};
use pwm_pca9685::{Channel, Pca9685};

use super::{check_channel, MotorError, PwmDriver};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Board channels by index.
const CHANNELS: [Channel; 16] = [
    Channel::C0,
    Channel::C1,
    Channel::C2,
    Channel::C3,
    Channel::C4,
    Channel::C5,
    Channel::C6,
    Channel::C7,
    Channel::C8,
    Channel::C9,
    Channel::C10,
    Channel::C11,
    Channel::C12,
    Channel::C13,
    Channel::C14,
    Channel::C15,
];

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> PwmDriver for Pca9685<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>,
{
    fn set_channel(&mut self, channel: u8, value: u16) -> Result<(), MotorError> {
        check_channel(channel, value)?;

        // The output turns on at the start of each period and off after `value` counts
        match self.set_channel_on_off(CHANNELS[channel as usize], 0, value) {
            Ok(_) => Ok(()),
            Err(pwm_pca9685::Error::I2C(_)) => Err(MotorError::I2c),
            Err(pwm_pca9685::Error::InvalidInputData) => Err(MotorError::InvalidValue(value)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the board on the Raspberry Pi's I2C bus.
#[cfg(all(target_arch = "arm", target_os = "linux"))]
pub fn open(
    address: u8,
    prescale: u8,
) -> Result<Pca9685<rppal::i2c::I2c>, MotorError> {
    let i2c = rppal::i2c::I2c::new().map_err(|_| MotorError::I2c)?;

    let mut board = Pca9685::new(i2c, address).map_err(|_| MotorError::I2c)?;
    board.set_prescale(prescale).map_err(|_| MotorError::I2c)?;
    board.enable().map_err(|_| MotorError::I2c)?;

    Ok(board)
}
