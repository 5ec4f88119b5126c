//! # Mechanisms Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::motor_ctrl::ChannelPair;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MechExecParams {
    /// Endpoint for the demands socket
    pub demands_endpoint: String,

    /// Time without a demand after which the motors are stopped.
    ///
    /// Units: milliseconds
    pub demands_timeout_ms: i32,

    pub board: BoardKind,

    /// I2C address of the PCA9685 board
    pub i2c_address: u8,

    /// PCA9685 prescale value, 121 gives a PWM frequency of 50 Hz
    pub prescale: u8,

    /// Forward and reverse channels of each motor, front left, front right, rear left, rear right
    pub channels: [ChannelPair; 4],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardKind {
    Pca9685,
    Sim,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MechExecParams {
    fn default() -> Self {
        Self {
            demands_endpoint: String::from("tcp://*:5000"),
            demands_timeout_ms: 200,
            board: BoardKind::Pca9685,
            i2c_address: 0x40,
            prescale: 121,
            channels: [
                ChannelPair::new(1, 0),
                ChannelPair::new(7, 6),
                ChannelPair::new(2, 3),
                ChannelPair::new(5, 4),
            ],
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_file() {
        let params: MechExecParams =
            util::params::load_str(include_str!("../../params/mech_exec.toml")).unwrap();

        assert_eq!(params.i2c_address, 0x40);
        assert_eq!(params.channels, MechExecParams::default().channels);
    }

    #[test]
    fn test_partial_file() {
        let params: MechExecParams = util::params::load_str(
            r#"
            board = "sim"
            channels = [
                { forward = 0, reverse = 1 },
                { forward = 2, reverse = 3 },
                { forward = 4, reverse = 5 },
                { forward = 6, reverse = 7 },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(params.board, BoardKind::Sim);
        assert_eq!(params.channels[3], ChannelPair::new(6, 7));
        assert_eq!(params.demands_timeout_ms, 200);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(util::params::load_str::<MechExecParams>("sensor_data_endpoint = \"x\"").is_err());
    }
}
