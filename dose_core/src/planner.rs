//! Schedule rebuild for one user aggregate.
//!
//! A rebuild replaces only pending, unsent, future entries. Resolved entries
//! and entries already attached to a notification stay for history and for
//! the escalation timeline, and new entries are spaced around them.
//!
//! The periodic tick rebuilds once per local day so skipped doses, whose
//! pills stay in the ledger, keep being scheduled.

use crate::clock::{resolve_clock_time, resolve_timezone};
use crate::config::ScheduleConfig;
use crate::dose_times::synthesize;
use crate::materialize::{materialize_around, DoseGroup};
use crate::{EntryStatus, UserAggregate, UserStatus};
use chrono::{DateTime, Duration, Utc};

/// Regenerate future entries; returns how many entries were added
pub fn rebuild_user_schedule(
    user: &mut UserAggregate,
    now: DateTime<Utc>,
    config: &ScheduleConfig,
) -> usize {
    let before = user.schedule.len();
    user.schedule
        .retain(|e| !(e.status == EntryStatus::Pending && !e.reminder_sent && e.scheduled_at > now));
    let dropped = before - user.schedule.len();

    let tz = resolve_timezone(&user.timezone, &config.default_timezone);
    user.last_rebuilt = Some(now.with_timezone(&tz).date_naive());

    if user.status != UserStatus::Active {
        tracing::info!(
            "User {} is {:?}, dropped {} future entries and scheduled none",
            user.key,
            user.status,
            dropped
        );
        return 0;
    }

    let wake = resolve_clock_time(&user.wake_time, &config.default_wake_time, "wake_time");
    let sleep = resolve_clock_time(&user.sleep_time, &config.default_sleep_time, "sleep_time");

    let groups: Vec<DoseGroup> = user
        .prescriptions
        .iter()
        .filter(|p| p.reminders_enabled)
        .map(|p| {
            let committed: u32 = user
                .schedule
                .iter()
                .filter(|e| e.prescription == p.name && e.status == EntryStatus::Pending)
                .fold(0u32, |total, e| total.saturating_add(e.dosage));
            let available = p.ledger.pill_count.saturating_sub(committed);

            let mut times: Vec<_> = synthesize(
                wake,
                sleep,
                &p.instructions,
                p.doses_per_day,
                available,
                p.dosage,
            )
            .into_iter()
            .map(|d| d.time)
            .collect();
            times.sort();
            times.dedup();

            DoseGroup {
                prescription: p.name.clone(),
                dosage: p.dosage,
                pill_count: available,
                times,
            }
        })
        .collect();

    let threshold = Duration::minutes(config.conflict_threshold_minutes);
    let fixed: Vec<DateTime<Utc>> = user
        .schedule
        .iter()
        .map(|e| e.scheduled_at)
        .filter(|at| *at > now - threshold)
        .collect();
    let entries = materialize_around(&groups, tz, now, threshold, &fixed);
    let added = entries.len();

    user.schedule.extend(entries);
    user.schedule.sort_by_key(|e| e.scheduled_at);

    tracing::info!(
        "Rebuilt schedule for {}: dropped {}, added {}",
        user.key,
        dropped,
        added
    );
    added
}

/// Rebuild unless it already happened on the user's current local date
///
/// Returns the number of entries added, or `None` when nothing ran.
pub fn rebuild_if_stale(
    user: &mut UserAggregate,
    now: DateTime<Utc>,
    config: &ScheduleConfig,
) -> Option<usize> {
    let tz = resolve_timezone(&user.timezone, &config.default_timezone);
    let today = now.with_timezone(&tz).date_naive();
    if user.last_rebuilt == Some(today) {
        return None;
    }
    tracing::debug!("Daily rebuild for {} on {}", user.key, today);
    Some(rebuild_user_schedule(user, now, config))
}
