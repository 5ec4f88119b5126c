//! # Drive telecommands
//!
//! Token parsers for the payloads of the drive command feeds. Operators type these by hand into a
//! dashboard so the parsers are forgiving about case and whitespace, but never guess at a number.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::TcParseError;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Tokens which switch something on. Everything else switches it off.
pub const AFFIRMATIVE_TOKENS: [&str; 9] = [
    "on", "1", "true", "start", "go", "enabled", "enable", "yes", "active",
];

/// Maximum speed demand.
///
/// Units: percent
pub const MAX_SPEED_PCT: u8 = 100;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Drive policy selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveMode {
    /// Drive straight ahead at the demanded speed.
    Manual,

    /// Drive ahead, slowing for and backing away from obstacles.
    Avoid,

    /// Follow a line on the ground, stopping for obstacles.
    LineFollow,
}

/// Position of the guide line relative to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineState {
    Left,
    Center,
    Right,

    /// The line sensor can't see the line.
    Unknown,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DriveMode {
    pub fn name(&self) -> &'static str {
        match self {
            DriveMode::Manual => "manual",
            DriveMode::Avoid => "avoid",
            DriveMode::LineFollow => "line",
        }
    }
}

impl Default for DriveMode {
    fn default() -> Self {
        DriveMode::Manual
    }
}

impl LineState {
    pub fn name(&self) -> &'static str {
        match self {
            LineState::Left => "left",
            LineState::Center => "center",
            LineState::Right => "right",
            LineState::Unknown => "unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse an on/off token. Only the [`AFFIRMATIVE_TOKENS`] (in any case) mean on.
pub fn parse_switch(value: &str) -> bool {
    let value = value.trim().to_lowercase();

    AFFIRMATIVE_TOKENS.contains(&value.as_str())
}

/// Parse a speed demand, rounding to the nearest percent and clamping to `[0, 100]`.
pub fn parse_speed(value: &str) -> Result<u8, TcParseError> {
    let raw: f64 = value
        .trim()
        .parse()
        .map_err(|_| TcParseError::InvalidNumber(value.to_string()))?;

    if !raw.is_finite() {
        return Err(TcParseError::NotFinite(value.to_string()));
    }

    Ok(raw.round().clamp(0.0, MAX_SPEED_PCT as f64) as u8)
}

/// Parse a drive mode by prefix. Anything unrecognised falls back to [`DriveMode::Manual`].
pub fn parse_mode(value: &str) -> DriveMode {
    let value = value.trim().to_lowercase();

    if value.starts_with("avoid") {
        DriveMode::Avoid
    } else if value.starts_with("line") {
        DriveMode::LineFollow
    } else {
        DriveMode::Manual
    }
}

/// Parse a line position token.
pub fn parse_line(value: &str) -> Result<LineState, TcParseError> {
    match value.trim().to_lowercase().as_str() {
        "left" | "l" => Ok(LineState::Left),
        "center" | "centre" | "c" | "middle" => Ok(LineState::Center),
        "right" | "r" => Ok(LineState::Right),
        "unknown" | "none" | "lost" => Ok(LineState::Unknown),
        _ => Err(TcParseError::InvalidLine(value.to_string())),
    }
}

/// Parse a distance reading, rounding to the nearest centimetre.
pub fn parse_distance(value: &str) -> Result<u32, TcParseError> {
    let raw: f64 = value
        .trim()
        .parse()
        .map_err(|_| TcParseError::InvalidDistance(value.to_string()))?;

    if !raw.is_finite() || raw < 0.0 || raw > u32::MAX as f64 {
        return Err(TcParseError::InvalidDistance(value.to_string()));
    }

    Ok(raw.round() as u32)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_switch() {
        for t in ["ON", " yes ", "Go", "1", "active", "enable"].iter() {
            assert!(parse_switch(t), "{} should be on", t);
        }
        for t in ["off", "0", "", "stop", "onn", "no"].iter() {
            assert!(!parse_switch(t), "{} should be off", t);
        }
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed("40"), Ok(40));
        assert_eq!(parse_speed("150"), Ok(100));
        assert_eq!(parse_speed("-5"), Ok(0));
        assert_eq!(parse_speed("39.6"), Ok(40));
        assert_eq!(
            parse_speed("abc"),
            Err(TcParseError::InvalidNumber(String::from("abc")))
        );
        assert!(matches!(parse_speed("NaN"), Err(TcParseError::NotFinite(_))));
        assert!(matches!(parse_speed("inf"), Err(TcParseError::NotFinite(_))));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("Avoidance"), DriveMode::Avoid);
        assert_eq!(parse_mode("line_follow"), DriveMode::LineFollow);
        assert_eq!(parse_mode("MANUAL"), DriveMode::Manual);
        assert_eq!(parse_mode("warp"), DriveMode::Manual);
    }

    #[test]
    fn test_parse_line_and_distance() {
        assert_eq!(parse_line("Centre"), Ok(LineState::Center));
        assert_eq!(parse_line("r"), Ok(LineState::Right));
        assert_eq!(parse_line("lost"), Ok(LineState::Unknown));
        assert!(parse_line("diagonal").is_err());

        assert_eq!(parse_distance("12.4"), Ok(12));
        assert!(parse_distance("-1").is_err());
        assert!(parse_distance("far").is_err());
    }
}
