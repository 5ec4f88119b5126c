//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software: the network transports, the
//! telecommand vocabulary, feed naming and the equipment interfaces.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod tc;

/// Command and response definitions for equipment (like mechanisms)
pub mod eqpt;

/// Feed (topic) naming
pub mod feeds;

/// Network module
pub mod net;
