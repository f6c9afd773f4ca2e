//! Compound durations and timestamp parsing
//!
//! Durations use the InfluxQL-like compound form `1w2d3h4m5.6s`: every
//! component is optional, components appear in decreasing order, and only
//! the seconds component may carry a fraction.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{EngineError, EngineResult};

pub const SECS_PER_MINUTE: u64 = 60;
pub const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
pub const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;
pub const SECS_PER_WEEK: u64 = 7 * SECS_PER_DAY;

const UNITS: [(char, u64); 5] = [
    ('w', SECS_PER_WEEK),
    ('d', SECS_PER_DAY),
    ('h', SECS_PER_HOUR),
    ('m', SECS_PER_MINUTE),
    ('s', 1),
];

/// Parse a compound duration such as `1d1h1s` into seconds
pub fn parse_duration(input: &str) -> EngineResult<f64> {
    let text = input.trim();
    if text.is_empty() {
        return Err(EngineError::parse("duration", input));
    }

    let mut total = 0.0;
    // Index into UNITS of the next unit allowed; enforces ordering and uniqueness
    let mut next_unit = 0;
    let mut chars = text.chars().peekable();

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(c) = chars.peek().copied() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let unit = chars.next().ok_or_else(|| EngineError::parse("duration", input))?;
        if number.is_empty() {
            return Err(EngineError::parse("duration", input));
        }

        let position = UNITS[next_unit..]
            .iter()
            .position(|(u, _)| *u == unit)
            .map(|p| p + next_unit)
            .ok_or_else(|| EngineError::parse("duration", input))?;
        let (_, scale) = UNITS[position];

        let value: f64 = if unit == 's' {
            number
                .parse()
                .map_err(|_| EngineError::parse("duration", input))?
        } else {
            number
                .parse::<u64>()
                .map_err(|_| EngineError::parse("duration", input))? as f64
        };

        total += value * scale as f64;
        next_unit = position + 1;
    }

    Ok(total)
}

/// Render seconds as a compound duration, omitting zero components
pub fn format_duration(seconds: f64) -> String {
    if seconds.is_nan() {
        return "nan".to_string();
    }
    if seconds.is_infinite() {
        return if seconds > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let sign = if seconds < 0.0 { "-" } else { "" };
    // Work in centiseconds so the components stay exact integers
    let mut centis = (seconds.abs() * 100.0).round() as u64;

    let mut out = String::new();
    for (unit, scale) in UNITS.iter().take(4) {
        let scale = scale * 100;
        let count = centis / scale;
        centis %= scale;
        if count > 0 {
            out.push_str(&format!("{}{}", count, unit));
        }
    }

    if centis > 0 {
        let whole = centis / 100;
        let frac = centis % 100;
        if frac == 0 {
            out.push_str(&format!("{}s", whole));
        } else {
            let rendered = format!("{}.{:02}", whole, frac);
            out.push_str(rendered.trim_end_matches('0'));
            out.push('s');
        }
    }

    if out.is_empty() {
        return "0s".to_string();
    }
    format!("{}{}", sign, out)
}

/// Parse a timestamp as produced by the query layer.
///
/// Accepts RFC3339, naive ISO-8601 (taken as UTC), numeric epoch seconds,
/// or a compound duration measured from the Unix epoch.
pub fn parse_instant(input: &str) -> EngineResult<DateTime<Utc>> {
    let text = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }

    let numeric = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-');
    if numeric {
        if let Ok(secs) = text.parse::<f64>() {
            return epoch_seconds_to_instant(secs).ok_or_else(|| EngineError::parse("timestamp", input));
        }
    }

    match parse_duration(text) {
        Ok(secs) => epoch_seconds_to_instant(secs).ok_or_else(|| EngineError::parse("timestamp", input)),
        Err(_) => Err(EngineError::parse("timestamp", input)),
    }
}

/// Convert fractional epoch seconds to an instant
pub fn epoch_seconds_to_instant(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Render seconds as an InfluxQL duration literal
pub fn influx_duration_literal(seconds: f64) -> String {
    format!("{}ms", (seconds * 1000.0).round() as i64)
}
