//! # Rover library.
//!
//! This library allows other crates in the workspace, and the benchmarks, to access items defined
//! inside the rover crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Actuator boundary - polarity mapping and the simulated motor board
pub mod actuator;

/// Command arbitrator - owns the vehicle state and applies operator commands
pub mod arbiter;

/// Drive mode engine - decides what the motors should do each cycle
pub mod drive;

/// Mechanisms client - sends actuator demands to the mechanisms server
#[cfg(feature = "mech")]
pub mod mech_client;

/// Executable parameters and credentials
pub mod params;

/// Rate limited, coalescing telemetry publisher
pub mod publisher;

/// The control cycle
pub mod rover;

/// Local sensor adapters
pub mod sensors;

/// Lifecycle supervisor - run loop and shutdown
pub mod supervisor;

/// Telecommand client - recieves operator commands from the command feeds
pub mod tc_client;

/// Telemetry archive, audit log and status feeds
pub mod telemetry;
