//! Local clock-time and timezone parsing.
//!
//! Malformed input never aborts scheduling: the resolver functions log a
//! warning and fall back to the configured default.

use chrono::{Duration, NaiveTime, Timelike};
use chrono_tz::Tz;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Parse `HH:MM` (24-hour) or `h:mm AM/PM` (12-hour)
pub fn parse_clock_time(input: &str) -> Option<NaiveTime> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();

    let (body, meridiem) = if let Some(rest) = lower.strip_suffix("am") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = lower.strip_suffix("pm") {
        (rest.trim_end(), Some(true))
    } else {
        (lower.as_str(), None)
    };

    let (hour_str, minute_str) = body.split_once(':')?;
    if hour_str.is_empty()
        || hour_str.len() > 2
        || minute_str.len() != 2
        || !hour_str.chars().all(|c| c.is_ascii_digit())
        || !minute_str.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = minute_str.parse().ok()?;

    let hour = match meridiem {
        None => hour,
        Some(pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, false) => h,
                (h, true) => h + 12,
            }
        }
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Parse `raw`, falling back to `default` (and then to midnight) with a warning
pub fn resolve_clock_time(raw: &str, default: &str, label: &str) -> NaiveTime {
    if let Some(time) = parse_clock_time(raw) {
        return time;
    }

    tracing::warn!(
        "Invalid {} time {:?}, using default {}",
        label,
        raw,
        default
    );
    parse_clock_time(default).unwrap_or_else(|| {
        tracing::warn!("Default {} time {:?} is also invalid, using 00:00", label, default);
        NaiveTime::default()
    })
}

/// Resolve an IANA timezone name, falling back to `default` and then UTC
pub fn resolve_timezone(raw: &str, default: &str) -> Tz {
    if let Ok(tz) = raw.trim().parse::<Tz>() {
        return tz;
    }

    if !raw.trim().is_empty() {
        tracing::warn!("Unknown timezone {:?}, using default {}", raw, default);
    }
    default.trim().parse::<Tz>().unwrap_or(Tz::UTC)
}

/// Minutes since local midnight
pub fn minutes_of_day(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight() / 60)
}

/// Clock time for a minute offset, wrapping modulo 24 hours
pub fn time_from_minutes(minutes: i64) -> NaiveTime {
    NaiveTime::default() + Duration::minutes(minutes.rem_euclid(MINUTES_PER_DAY))
}
