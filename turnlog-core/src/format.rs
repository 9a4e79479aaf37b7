//! Formatting helpers for reports.

use chrono::{DateTime, Utc};

/// Format milliseconds as a short human duration (e.g. "1h 02m", "4.5s").
pub fn format_duration_ms(ms: f64) -> String {
    if !ms.is_finite() || ms <= 0.0 {
        return "0s".to_string();
    }

    let secs = ms / 1000.0;
    if secs < 60.0 {
        return format!("{:.1}s", secs);
    }

    let total = secs.round() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m {:02}s", minutes, seconds)
    }
}

/// Format a rate in `[0, 1]` as a percentage, or a dash when there is none.
pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(rate) if rate.is_finite() => format!("{:.0}%", rate * 100.0),
        _ => "-".to_string(),
    }
}

/// Format an optional timestamp, or a dash if missing.
pub fn format_timestamp_opt(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}
