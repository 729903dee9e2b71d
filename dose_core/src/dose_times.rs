//! Dose-time synthesis: dosing parameters to ordered daily clock times.
//!
//! Rules, with `wake`/`sleep` as minutes since midnight:
//! - 1 dose: bedtime keywords → sleep − 60, breakfast/morning → wake + 60,
//!   before/after meal or food → midpoint of the waking window, else wake + 60
//! - 2 doses: wake + 60 and sleep − 60, whatever the instructions say
//! - 3+ doses: evenly spaced over [wake (+60 if breakfast), sleep (−60 if bed)];
//!   an empty or inverted window falls back to `doses` hours from wake
//!
//! A sleep time at or before the wake time is read as the next day.

use crate::clock::{minutes_of_day, time_from_minutes, MINUTES_PER_DAY};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

pub const MIN_DOSES_PER_DAY: u8 = 1;
pub const MAX_DOSES_PER_DAY: u8 = 10;

const ANCHOR_OFFSET_MINUTES: i64 = 60;

/// A recurring local clock time when one dose is due
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoseTime {
    pub time: NaiveTime,
    pub dosage: u32,
    pub pill_count: u32,
}

/// Keyword anchors found in free-text instructions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Anchors {
    pub bedtime: bool,
    pub breakfast: bool,
    pub meal: bool,
}

impl Anchors {
    pub fn from_instructions(instructions: &str) -> Self {
        let text = instructions.to_lowercase();
        let has = |needle: &str| text.contains(needle);

        Self {
            bedtime: has("bed") || has("sleep"),
            breakfast: has("breakfast") || has("morning"),
            meal: has("before meal")
                || has("after meal")
                || has("before food")
                || has("after food"),
        }
    }
}

/// Clamp a requested dose count into the supported range
pub fn clamp_doses_per_day(doses_per_day: u8) -> u8 {
    let clamped = doses_per_day.clamp(MIN_DOSES_PER_DAY, MAX_DOSES_PER_DAY);
    if clamped != doses_per_day {
        tracing::warn!(
            "doses_per_day {} out of range, using {}",
            doses_per_day,
            clamped
        );
    }
    clamped
}

/// Derive the ordered dose times for one prescription
///
/// Always returns exactly `clamp_doses_per_day(doses_per_day)` entries.
pub fn synthesize(
    wake: NaiveTime,
    sleep: NaiveTime,
    instructions: &str,
    doses_per_day: u8,
    pill_count: u32,
    dosage: u32,
) -> Vec<DoseTime> {
    let doses = i64::from(clamp_doses_per_day(doses_per_day));
    let anchors = Anchors::from_instructions(instructions);

    let wake_min = minutes_of_day(wake);
    let mut sleep_min = minutes_of_day(sleep);
    if sleep_min <= wake_min {
        tracing::debug!(
            "Sleep {} not after wake {}, treating sleep as next day",
            sleep,
            wake
        );
        sleep_min += MINUTES_PER_DAY;
    }

    let minutes: Vec<i64> = match doses {
        1 => {
            let at = if anchors.bedtime {
                sleep_min - ANCHOR_OFFSET_MINUTES
            } else if anchors.breakfast {
                wake_min + ANCHOR_OFFSET_MINUTES
            } else if anchors.meal {
                wake_min + (sleep_min - wake_min) / 2
            } else {
                wake_min + ANCHOR_OFFSET_MINUTES
            };
            vec![at]
        }
        // Keyword branches all land on the same pair.
        2 => vec![
            wake_min + ANCHOR_OFFSET_MINUTES,
            sleep_min - ANCHOR_OFFSET_MINUTES,
        ],
        _ => {
            let mut start = wake_min;
            let mut end = sleep_min;
            if anchors.breakfast {
                start += ANCHOR_OFFSET_MINUTES;
            }
            if anchors.bedtime {
                end -= ANCHOR_OFFSET_MINUTES;
            }
            if end <= start {
                tracing::debug!("Dose window collapsed, spacing {} doses hourly from wake", doses);
                start = wake_min;
                end = wake_min + 60 * doses;
            }

            let span = end - start;
            (0..doses).map(|i| start + i * span / (doses - 1)).collect()
        }
    };

    minutes
        .into_iter()
        .map(|m| DoseTime {
            time: time_from_minutes(m),
            dosage,
            pill_count,
        })
        .collect()
}
