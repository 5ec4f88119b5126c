//! # Telecommand module
//!
//! This module provides telecommand functionality to the communications interface. A telecommand
//! (TC) is a raw payload which arrived on one of the vehicle's command feeds. Interpreting the
//! payload is left to the receiver, the token parsers for each kind live in [`drive`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod drive;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A telecommand, i.e. an instruction sent to the vehicle by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tc {
    /// The kind of the telecommand, taken from the feed it arrived on
    pub kind: TcKind,

    /// The raw payload, trimmed of surrounding whitespace
    pub payload: String,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Telecommand kinds, one per inbound command feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcKind {
    StartStop,
    Emergency,
    Speed,
    Mode,
    Line,
    Distance,
}

/// Possible parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TcParseError {
    #[error("Expected a number, found \"{0}\"")]
    InvalidNumber(String),

    #[error("Expected a finite number, found \"{0}\"")]
    NotFinite(String),

    #[error("Expected a line position (left, center, right or unknown), found \"{0}\"")]
    InvalidLine(String),

    #[error("Expected a non-negative distance, found \"{0}\"")]
    InvalidDistance(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Tc {
    pub fn new(kind: TcKind, payload: &str) -> Self {
        Self {
            kind,
            payload: payload.trim().to_string(),
        }
    }
}

impl TcKind {
    /// Every kind, in the order feeds are subscribed.
    pub const ALL: [TcKind; 6] = [
        TcKind::Emergency,
        TcKind::StartStop,
        TcKind::Speed,
        TcKind::Mode,
        TcKind::Line,
        TcKind::Distance,
    ];

    /// Parse a kind from its short name, as used in scripts and parameter files.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "startstop" => Some(TcKind::StartStop),
            "emergency" => Some(TcKind::Emergency),
            "speed" => Some(TcKind::Speed),
            "mode" => Some(TcKind::Mode),
            "line" => Some(TcKind::Line),
            "distance" => Some(TcKind::Distance),
            _ => None,
        }
    }

    /// The short name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            TcKind::StartStop => "startstop",
            TcKind::Emergency => "emergency",
            TcKind::Speed => "speed",
            TcKind::Mode => "mode",
            TcKind::Line => "line",
            TcKind::Distance => "distance",
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
