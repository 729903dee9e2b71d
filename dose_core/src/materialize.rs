//! Schedule materialization: dose times to dated, timezone-aware entries.
//!
//! Each prescription covers `pill_count / (dosage * doses_per_day)` full days
//! starting with the anchor's local date, plus a trailing partial day using
//! the earliest dose times the leftover pills can cover. Only entries strictly
//! after the anchor are kept, and the combined list of all prescriptions is
//! passed through conflict resolution.

use crate::conflicts::resolve_conflicts_around;
use crate::ScheduleEntry;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Dose times of one prescription together with its inventory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoseGroup {
    pub prescription: String,
    pub dosage: u32,
    /// Pills available for new entries
    pub pill_count: u32,
    pub times: Vec<NaiveTime>,
}

/// Build the conflict-resolved schedule for all groups
pub fn materialize(
    groups: &[DoseGroup],
    tz: Tz,
    anchor: DateTime<Utc>,
    threshold: Duration,
) -> Vec<ScheduleEntry> {
    materialize_around(groups, tz, anchor, threshold, &[])
}

/// Build new entries that also keep clear of entries already in place
pub fn materialize_around(
    groups: &[DoseGroup],
    tz: Tz,
    anchor: DateTime<Utc>,
    threshold: Duration,
    fixed: &[DateTime<Utc>],
) -> Vec<ScheduleEntry> {
    let mut entries = Vec::new();
    for group in groups {
        entries.extend(materialize_group(group, tz, anchor));
    }
    resolve_conflicts_around(entries, fixed, threshold)
}

fn materialize_group(group: &DoseGroup, tz: Tz, anchor: DateTime<Utc>) -> Vec<ScheduleEntry> {
    if group.dosage == 0 {
        tracing::warn!("Prescription {} has zero dosage, not scheduling", group.prescription);
        return Vec::new();
    }
    if group.pill_count == 0 {
        tracing::debug!("Prescription {} has no pills left", group.prescription);
        return Vec::new();
    }

    let mut times = group.times.clone();
    times.sort();
    times.dedup();
    if times.is_empty() {
        return Vec::new();
    }

    let dosage = u64::from(group.dosage);
    let pills = u64::from(group.pill_count);
    let day_cost = dosage * times.len() as u64;
    let full_days = pills / day_cost;
    let trailing_doses = ((pills % day_cost) / dosage) as usize;

    let today = anchor.with_timezone(&tz).date_naive();
    let mut entries = Vec::new();

    for day in 0..full_days {
        let date = today + Duration::days(day as i64);
        push_future(&mut entries, group, tz, date, &times, anchor);
    }

    if trailing_doses > 0 {
        let date = today + Duration::days(full_days as i64);
        push_future(&mut entries, group, tz, date, &times[..trailing_doses], anchor);
    }

    tracing::debug!(
        "Materialized {} entries for {} ({} full days, {} trailing doses)",
        entries.len(),
        group.prescription,
        full_days,
        trailing_doses
    );
    entries
}

fn push_future(
    entries: &mut Vec<ScheduleEntry>,
    group: &DoseGroup,
    tz: Tz,
    date: NaiveDate,
    times: &[NaiveTime],
    anchor: DateTime<Utc>,
) {
    for &time in times {
        match localize(tz, date, time) {
            Some(at) if at > anchor => {
                entries.push(ScheduleEntry::pending(&group.prescription, at, group.dosage));
            }
            Some(_) => {}
            None => tracing::warn!(
                "Could not place {} at {} {} in {}",
                group.prescription,
                date,
                time,
                tz
            ),
        }
    }
}

/// Local wall-clock time to an instant
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap move forward by one hour.
pub fn localize(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}
