//! # Command script interpreter module
//!
//! This module provides an interpreter for timed command scripts, allowing telecommands to be fed
//! to the vehicle from a file rather than the network. A script is a list of entries of the form
//!
//! ```text
//! <seconds>: <feed> <payload>;
//! ```
//!
//! for example `1.5: speed 40;`. Anything outside an entry is ignored, so comments can be written
//! freely on their own lines.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use thiserror::Error;

// Internal
use comms_if::tc::{Tc, TcKind};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A command which is scripted to occur at a specific time.
#[derive(Debug, Clone)]
struct Command {
    /// The time the command is supposed to execute at
    exec_time_s: f64,

    /// The Telecommand to run
    tc: Tc,
}

/// A script interpreter.
///
/// After initialising with the path to the script to run use `.get_pending_tcs` to acquire a list
/// of telecommands that need executing.
#[derive(Debug)]
pub struct ScriptInterpreter {
    cmds: VecDeque<Command>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error("Script contains an invalid timestamp: {0}. Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an unknown feed at {0} s: {1}")]
    UnknownFeed(f64, String),

    #[error("Could not build the script pattern: {0}")]
    PatternError(regex::Error),
}

#[derive(Debug, PartialEq)]
pub enum PendingTcs {
    None,
    Some(Vec<Tc>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let script = fs::read_to_string(script_path).map_err(ScriptError::ScriptLoadError)?;

        Self::parse(&script)
    }

    /// Create a new interpreter from the contents of a script.
    pub fn parse(script: &str) -> Result<Self, ScriptError> {
        // Go through the script executing __the magic regex__.
        let re = RegexBuilder::new(r"^\s*(\d+(?:\.\d+)?)\s*:\s*([A-Za-z_]+)\s+([^;]*?)\s*;")
            .multi_line(true)
            .build()
            .map_err(ScriptError::PatternError)?;

        let mut cmds: Vec<Command> = Vec::new();

        for cap in re.captures_iter(script) {
            let (time_str, feed, payload) = (&cap[1], &cap[2], &cap[3]);

            let exec_time_s: f64 = time_str
                .parse()
                .map_err(|_| ScriptError::InvalidTimestamp(time_str.to_string()))?;

            let kind = TcKind::from_name(feed)
                .ok_or_else(|| ScriptError::UnknownFeed(exec_time_s, feed.to_string()))?;

            cmds.push(Command {
                exec_time_s,
                tc: Tc::new(kind, payload),
            });
        }

        if cmds.is_empty() {
            return Err(ScriptError::ScriptEmpty);
        }

        // Stable, so entries at the same time keep their script order
        cmds.sort_by(|a, b| a.exec_time_s.total_cmp(&b.exec_time_s));

        Ok(ScriptInterpreter { cmds: cmds.into() })
    }

    /// Return the TCs whose execution time is at or before `now_s`, in script order.
    pub fn get_pending_tcs(&mut self, now_s: f64) -> PendingTcs {
        // If the queue is empty the script is over and we return the end of script variant
        if self.cmds.is_empty() {
            return PendingTcs::EndOfScript;
        }

        let mut tc_vec: Vec<Tc> = vec![];

        while let Some(cmd) = self.cmds.front() {
            if cmd.exec_time_s > now_s {
                break;
            }
            if let Some(cmd) = self.cmds.pop_front() {
                tc_vec.push(cmd.tc);
            }
        }

        if tc_vec.is_empty() {
            PendingTcs::None
        } else {
            PendingTcs::Some(tc_vec)
        }
    }

    /// Get the number of TCs remaining in the script
    pub fn get_num_tcs(&self) -> usize {
        self.cmds.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.cmds.back() {
            Some(c) => c.exec_time_s,
            None => 0f64,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = "
        # Drive forward then stop
        0.0: startstop on;
        0.5: speed 40;
        2: mode avoid;
        1.0: emergency  yes ;
        3.0: startstop off;
    ";

    #[test]
    fn test_script_pending() {
        let mut si = ScriptInterpreter::parse(SCRIPT).unwrap();

        assert_eq!(si.get_num_tcs(), 5);
        assert_eq!(si.get_duration(), 3.0);

        assert_eq!(
            si.get_pending_tcs(0.6),
            PendingTcs::Some(vec![
                Tc::new(TcKind::StartStop, "on"),
                Tc::new(TcKind::Speed, "40")
            ])
        );
        assert_eq!(si.get_pending_tcs(0.7), PendingTcs::None);
        assert_eq!(
            si.get_pending_tcs(2.0),
            PendingTcs::Some(vec![
                Tc::new(TcKind::Emergency, "yes"),
                Tc::new(TcKind::Mode, "avoid")
            ])
        );
        assert_eq!(
            si.get_pending_tcs(10.0),
            PendingTcs::Some(vec![Tc::new(TcKind::StartStop, "off")])
        );
        assert_eq!(si.get_pending_tcs(11.0), PendingTcs::EndOfScript);
    }

    #[test]
    fn test_script_errors() {
        assert!(matches!(
            ScriptInterpreter::parse("nothing here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            ScriptInterpreter::parse("1.0: warp 9;"),
            Err(ScriptError::UnknownFeed(_, _))
        ));
        assert!(matches!(
            ScriptInterpreter::new("/no/such/script.sps"),
            Err(ScriptError::ScriptLoadError(_))
        ));
    }
}
