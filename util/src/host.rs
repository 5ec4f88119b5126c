//! Host platform utility functions

use std::path::PathBuf;

/// Environment variable pointing at the root of the software checkout.
///
/// Parameter files are loaded from `$SMARTPATH_SW_ROOT/params` and sessions are created in
/// `$SMARTPATH_SW_ROOT/sessions`.
pub const SW_ROOT_ENV: &str = "SMARTPATH_SW_ROOT";

/// Get the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV).map(PathBuf::from)
}

/// Get the name of this host, or `"unknown"` if it cannot be determined.
pub fn get_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| String::from("unknown"))
}
