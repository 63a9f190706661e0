//! Frequency-cap descriptor normalization.
//!
//! The exchange describes cache windows as free-text durations ("5 days",
//! "1 hour") and impression limits as numbers or numeric strings. Anything
//! unparseable or non-positive falls back to a 24-hour window and a single
//! impression rather than failing the refill.

use chrono::Duration;

pub const DEFAULT_DURATION_SECS: i64 = 86_400;
pub const DEFAULT_IMPRESSION_LIMIT: u32 = 1;

/// Closed unit table; trailing "s" is accepted ("day" / "days").
fn unit_seconds(unit: &str) -> Option<i64> {
    match unit.strip_suffix('s').unwrap_or(unit) {
        "second" => Some(1),
        "minute" => Some(60),
        "hour" => Some(3_600),
        "day" => Some(86_400),
        "week" => Some(604_800),
        _ => None,
    }
}

/// Convert a `time_frame` string into a cache duration.
pub fn normalized_duration(time_frame: Option<&str>) -> Duration {
    let parsed = time_frame.and_then(|raw| {
        let mut words = raw.split_whitespace();
        let magnitude: i64 = words.next()?.parse().ok()?;
        let unit = unit_seconds(&words.next()?.to_lowercase())?;
        if words.next().is_some() || magnitude <= 0 {
            return None;
        }
        Some(magnitude * unit)
    });
    Duration::seconds(parsed.unwrap_or(DEFAULT_DURATION_SECS))
}

/// Convert an `impression_limit` value into a per-creative budget.
pub fn normalized_limit(limit: Option<&serde_json::Value>) -> u32 {
    let parsed = match limit {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    match parsed {
        Some(limit) if limit > 0 => limit,
        _ => DEFAULT_IMPRESSION_LIMIT,
    }
}
