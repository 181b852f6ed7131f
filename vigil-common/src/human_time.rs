//! Human-readable duration formatting
//!
//! Used for elapsed time and ETA in batch progress logs and the CLI report.
//! Output keeps the two most significant units so columns stay short:
//! `850ms`, `42.3s`, `5m 30s`, `2h 07m`, `3d 04h`.

use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Format a duration with at most two units
///
/// ```
/// use std::time::Duration;
/// use vigil_common::human_time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
/// assert_eq!(format_duration(Duration::from_secs(330)), "5m 30s");
/// assert_eq!(format_duration(Duration::from_secs(7620)), "2h 07m");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    if secs < MINUTE {
        return format!("{:.1}s", duration.as_secs_f64());
    }
    if secs < HOUR {
        return format!("{}m {:02}s", secs / MINUTE, secs % MINUTE);
    }
    if secs < DAY {
        return format!("{}h {:02}m", secs / HOUR, (secs % HOUR) / MINUTE);
    }
    format!("{}d {:02}h", secs / DAY, (secs % DAY) / HOUR)
}

/// Format fractional seconds; negative or non-finite input renders as `0ms`
pub fn format_seconds(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0ms".to_string();
    }
    format_duration(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}

/// Format an optional ETA; `None` renders as "unknown"
pub fn format_eta(eta_seconds: Option<u64>) -> String {
    match eta_seconds {
        Some(0) => "done".to_string(),
        Some(secs) => format_duration(Duration::from_secs(secs)),
        None => "unknown".to_string(),
    }
}
