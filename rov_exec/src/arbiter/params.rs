//! Parameters structure for the arbiter

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the command arbiter.
#[derive(Debug, Clone, Copy)]
pub struct ArbiterParams {
    /// If true clearing an emergency restores the running state held when it was engaged.
    pub auto_resume: bool,

    /// Speed demand before the operator sends one.
    ///
    /// Units: percent
    pub initial_speed_pct: u8,
}

impl Default for ArbiterParams {
    fn default() -> Self {
        Self {
            auto_resume: false,
            initial_speed_pct: 35,
        }
    }
}
