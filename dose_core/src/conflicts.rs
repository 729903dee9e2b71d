//! Temporal conflict resolution between schedule entries.
//!
//! Entries closer than the threshold to their predecessor are pushed to
//! exactly `predecessor + threshold`. The push cascades: a moved entry
//! becomes the anchor for the next one. Entries are never clamped to their
//! original calendar day, so a long run of collisions may cross midnight.

use crate::ScheduleEntry;
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_CONFLICT_THRESHOLD_MINUTES: i64 = 30;

/// Sort and space entries so adjacent reminders are at least `threshold` apart
///
/// Ordering is by instant, then prescription name, then input order.
/// The first entry is never moved.
pub fn resolve_conflicts(entries: Vec<ScheduleEntry>, threshold: Duration) -> Vec<ScheduleEntry> {
    resolve_conflicts_around(entries, &[], threshold)
}

/// Like [`resolve_conflicts`], but also keep clear of `fixed` instants
///
/// Fixed instants belong to entries that can no longer move (already sent
/// or already resolved). A movable entry landing within `threshold` of one
/// is pushed to `fixed + threshold`, and the cascade continues from there.
pub fn resolve_conflicts_around(
    mut entries: Vec<ScheduleEntry>,
    fixed: &[DateTime<Utc>],
    threshold: Duration,
) -> Vec<ScheduleEntry> {
    // sort_by is stable, which preserves input order for full ties
    entries.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.prescription.cmp(&b.prescription))
    });
    let mut fixed = fixed.to_vec();
    fixed.sort();

    let mut moved = 0;
    let mut anchor: Option<DateTime<Utc>> = None;
    for entry in entries.iter_mut() {
        let mut at = entry.scheduled_at;
        if let Some(previous) = anchor {
            if at - previous < threshold {
                at = previous + threshold;
            }
        }
        // Only moves forward, so each fixed instant is passed at most once
        while let Some(blocker) = fixed.iter().find(|f| (**f - at).abs() < threshold) {
            at = *blocker + threshold;
        }

        if at != entry.scheduled_at {
            tracing::debug!(
                "Staggering {} from {} to {}",
                entry.prescription,
                entry.scheduled_at,
                at
            );
            entry.scheduled_at = at;
            moved += 1;
        }
        anchor = Some(at);
    }

    if moved > 0 {
        tracing::info!("Staggered {} of {} schedule entries", moved, entries.len());
    }

    entries
}
