//! Time formatting helpers.

use std::time::Duration;

/// Format a duration to a short human-readable string.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis() as u64;
    let secs = d.as_secs();
    if secs == 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
