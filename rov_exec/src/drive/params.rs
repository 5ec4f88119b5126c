//! Parameters structure for the drive engine

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the drive engine.
#[derive(Debug, Clone)]
pub struct DriveParams {
    // ---- OBSTACLES ----
    /// Distance below which an obstacle is avoided.
    ///
    /// Units: centimeters
    pub obstacle_near_cm: u32,

    /// Distance below which the vehicle slows to half speed in avoid mode.
    ///
    /// Units: centimeters
    pub obstacle_far_cm: u32,

    /// Units: milliseconds
    pub reverse_ms: u64,

    /// Units: milliseconds
    pub turn_ms: u64,

    /// Units: milliseconds
    pub pause_ms: u64,

    // ---- LINE FOLLOWING ----
    /// Units: percent
    pub line_follow_speed_pct: u8,

    /// Fraction of the base duty kept by the inner side while turning back onto the line.
    pub line_turn_ratio: f64,

    /// Fraction of the base duty used while the line is lost.
    pub line_search_ratio: f64,

    // ---- SENSORS ----
    /// Maximum age of a distance reading.
    ///
    /// Units: seconds
    pub sensor_stale_s: f64,

    // ---- MOTORS ----
    pub max_duty: i32,
}

impl Default for DriveParams {
    fn default() -> Self {
        Self {
            obstacle_near_cm: 20,
            obstacle_far_cm: 40,
            reverse_ms: 400,
            turn_ms: 350,
            pause_ms: 150,
            line_follow_speed_pct: 30,
            line_turn_ratio: 0.3,
            line_search_ratio: 0.5,
            sensor_stale_s: 1.0,
            max_duty: 4095,
        }
    }
}
