//! Notification and escalation state machine.
//!
//! Per notification: `pending → taken | skipped | failed`, all terminal.
//! Per linked schedule entry: `pending → taken | skipped`, terminal.
//!
//! Timeline for an unanswered notification (minutes since `sent_at`):
//! - first resend at 20 (`resend_count` 0 → 1)
//! - second resend at 30 (1 → 2)
//! - forced skip at 40, identical to a "skipped" answer
//!
//! At most one step is taken per notification per tick. All functions here
//! mutate the aggregate and return what must be sent; nothing is delivered.
//!
//! Unsent entries more than `max_lateness_minutes` past their instant are
//! never reminded about. [`close_stale_entries`] marks them skipped so a
//! restart after downtime does not send a backlog.

use crate::caregivers::{AffectedMedication, AlertReason};
use crate::clock::resolve_timezone;
use crate::config::{EscalationConfig, ScheduleConfig};
use crate::messages::{followup_body, preview, reminder_body};
use crate::outbound::Outbound;
use crate::{
    EntryStatus, Error, Notification, NotificationStatus, Outcome, Result, UserAggregate,
    UserStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Result of answering a notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// The notification moved to a terminal state
    Applied {
        notification_id: Uuid,
        outcome: Outcome,
        medications: Vec<String>,
    },
    /// The notification was already terminal; nothing changed
    AlreadyResolved {
        notification_id: Uuid,
        status: NotificationStatus,
    },
    /// No notification was waiting; reports the last answered one, if any
    NothingPending {
        last_status: Option<NotificationStatus>,
        last_medications: Vec<String>,
    },
}

/// What one escalation pass did for one user
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EscalationReport {
    pub resends: usize,
    pub auto_skipped: usize,
    pub failed: usize,
}

/// Bundle due, unsent entries into new pending notifications
///
/// Entries are due once `scheduled_at <= now + due_window` and no older than
/// `now - max_lateness`. Entries sharing an instant go into the same
/// notification. Returns one reminder per notification created.
pub fn create_due_notifications(
    user: &mut UserAggregate,
    now: DateTime<Utc>,
    escalation: &EscalationConfig,
    schedule: &ScheduleConfig,
) -> Vec<Outbound> {
    if user.status != UserStatus::Active || !user.notifications_enabled {
        return Vec::new();
    }

    let horizon = now + Duration::minutes(escalation.due_window_minutes);
    let oldest = now - Duration::minutes(escalation.max_lateness_minutes);
    let mut groups: BTreeMap<DateTime<Utc>, Vec<usize>> = BTreeMap::new();

    for (index, entry) in user.schedule.iter().enumerate() {
        if entry.status != EntryStatus::Pending
            || entry.reminder_sent
            || entry.scheduled_at > horizon
            || entry.scheduled_at < oldest
        {
            continue;
        }
        match user.prescription(&entry.prescription) {
            Some(p) if p.reminders_enabled => {
                groups.entry(entry.scheduled_at).or_default().push(index);
            }
            Some(_) => {}
            None => tracing::warn!(
                "Schedule entry {} references missing prescription {}, skipping",
                entry.id,
                entry.prescription
            ),
        }
    }

    let tz = resolve_timezone(&user.timezone, &schedule.default_timezone);
    let mut outbound = Vec::new();

    for indices in groups.into_values() {
        let entries: Vec<_> = indices.iter().map(|&i| &user.schedule[i]).collect();
        let body = reminder_body(&entries, tz);

        let mut medications: Vec<String> = Vec::new();
        for entry in &entries {
            if !medications.contains(&entry.prescription) {
                medications.push(entry.prescription.clone());
            }
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            sent_at: now,
            body_preview: preview(&medications),
            medications,
            entry_ids: entries.iter().map(|e| e.id).collect(),
            status: NotificationStatus::Pending,
            resend_count: 0,
            channel: user.channel,
            resolved_at: None,
        };

        for &i in &indices {
            user.schedule[i].reminder_sent = true;
        }

        tracing::info!(
            "Created notification {} for {}: {}",
            notification.id,
            user.key,
            notification.body_preview
        );
        outbound.push(Outbound::Reminder {
            notification_id: notification.id,
            channel: notification.channel,
            body,
        });
        user.notifications.push(notification);
    }

    outbound
}

/// Close unsent entries too late to remind about; returns how many closed
///
/// Closed entries count as skipped in the ledger. No caregiver is alerted,
/// since the person was never asked.
pub fn close_stale_entries(
    user: &mut UserAggregate,
    now: DateTime<Utc>,
    escalation: &EscalationConfig,
) -> usize {
    let oldest = now - Duration::minutes(escalation.max_lateness_minutes);
    let mut closed = 0;

    for index in 0..user.schedule.len() {
        let entry = &user.schedule[index];
        if entry.status != EntryStatus::Pending || entry.reminder_sent || entry.scheduled_at >= oldest {
            continue;
        }
        let name = entry.prescription.clone();
        user.schedule[index].status = EntryStatus::Skipped;
        if let Some(p) = user.prescription_mut(&name) {
            p.ledger.record_skipped();
        }
        closed += 1;
    }

    if closed > 0 {
        tracing::warn!(
            "Closed {} overdue unsent entries for {} as skipped",
            closed,
            user.key
        );
    }
    closed
}

/// Advance every pending notification one step along the escalation timeline
pub fn escalate(
    user: &mut UserAggregate,
    now: DateTime<Utc>,
    config: &EscalationConfig,
) -> (EscalationReport, Vec<Outbound>) {
    let mut report = EscalationReport::default();
    let mut outbound = Vec::new();

    let pending: Vec<Uuid> = user
        .notifications
        .iter()
        .filter(|n| n.status == NotificationStatus::Pending)
        .map(|n| n.id)
        .collect();

    for id in pending {
        let Some(index) = user.notifications.iter().position(|n| n.id == id) else {
            continue;
        };

        let linked = user.notifications[index]
            .entry_ids
            .iter()
            .filter(|entry_id| user.entry(**entry_id).is_some())
            .count();
        if linked == 0 {
            tracing::warn!(
                "Notification {} for {} has no remaining schedule entries, marking failed",
                id,
                user.key
            );
            let notification = &mut user.notifications[index];
            notification.status = NotificationStatus::Failed;
            notification.resolved_at = Some(now);
            report.failed += 1;
            continue;
        }

        let notification = &mut user.notifications[index];
        let elapsed = (now - notification.sent_at).num_minutes();

        match notification.resend_count {
            0 if elapsed >= config.first_resend_minutes => {
                notification.resend_count = 1;
                report.resends += 1;
                outbound.push(resend(notification));
            }
            1 if elapsed >= config.second_resend_minutes => {
                notification.resend_count = 2;
                report.resends += 1;
                outbound.push(resend(notification));
            }
            n if n >= 2 && elapsed >= config.auto_skip_minutes => {
                tracing::info!(
                    "Notification {} unanswered after {} minutes, marking missed",
                    id,
                    elapsed
                );
                match resolve(user, id, Outcome::Skipped, AlertReason::Missed, now) {
                    Ok((_, alerts)) => {
                        report.auto_skipped += 1;
                        outbound.extend(alerts);
                    }
                    Err(e) => tracing::warn!("Could not auto-skip {}: {}", id, e),
                }
            }
            _ => {}
        }
    }

    (report, outbound)
}

fn resend(notification: &Notification) -> Outbound {
    tracing::info!(
        "Resending notification {} (resend {})",
        notification.id,
        notification.resend_count
    );
    Outbound::Reminder {
        notification_id: notification.id,
        channel: notification.channel,
        body: followup_body(&notification.medications),
    }
}

/// Answer a specific notification; a no-op when it is already terminal
pub fn apply_confirmation(
    user: &mut UserAggregate,
    notification_id: Uuid,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Result<(Confirmation, Vec<Outbound>)> {
    resolve(user, notification_id, outcome, AlertReason::Skipped, now)
}

/// Answer the most recent pending notification
pub fn confirm_latest(
    user: &mut UserAggregate,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Result<(Confirmation, Vec<Outbound>)> {
    match user.latest_pending_notification().map(|n| n.id) {
        Some(id) => apply_confirmation(user, id, outcome, now),
        None => {
            let last = user.latest_answered_notification();
            Ok((
                Confirmation::NothingPending {
                    last_status: last.map(|n| n.status),
                    last_medications: last.map(|n| n.medications.clone()).unwrap_or_default(),
                },
                Vec::new(),
            ))
        }
    }
}

/// The shared transition behind confirmations and forced skips
fn resolve(
    user: &mut UserAggregate,
    notification_id: Uuid,
    outcome: Outcome,
    reason: AlertReason,
    now: DateTime<Utc>,
) -> Result<(Confirmation, Vec<Outbound>)> {
    let index = user
        .notifications
        .iter()
        .position(|n| n.id == notification_id)
        .ok_or_else(|| {
            Error::NotFound(format!("notification {} for user {}", notification_id, user.key))
        })?;

    let status = user.notifications[index].status;
    if status.is_terminal() {
        tracing::debug!(
            "Notification {} already {:?}, ignoring {:?}",
            notification_id,
            status,
            outcome
        );
        return Ok((
            Confirmation::AlreadyResolved {
                notification_id,
                status,
            },
            Vec::new(),
        ));
    }

    let entry_ids = user.notifications[index].entry_ids.clone();
    let mut affected = Vec::new();

    for entry_id in entry_ids {
        let Some(entry) = user.schedule.iter_mut().find(|e| e.id == entry_id) else {
            tracing::warn!("Notification {} links missing entry {}", notification_id, entry_id);
            continue;
        };
        if entry.status != EntryStatus::Pending {
            continue;
        }

        entry.status = outcome.into();
        if outcome == Outcome::Taken {
            entry.taken_at = Some(now);
        }
        let prescription_name = entry.prescription.clone();

        let Some(prescription) = user.prescription_mut(&prescription_name) else {
            tracing::warn!(
                "Entry {} references missing prescription {}",
                entry_id,
                prescription_name
            );
            continue;
        };

        match outcome {
            Outcome::Taken => prescription.ledger.record_taken(prescription.dosage),
            Outcome::Skipped => {
                prescription.ledger.record_skipped();
                affected.push(AffectedMedication {
                    name: prescription.name.clone(),
                    person: prescription.assigned_person.clone(),
                });
            }
        }
    }

    let notification = &mut user.notifications[index];
    notification.status = outcome.into();
    notification.resolved_at = Some(now);
    let medications = notification.medications.clone();

    tracing::info!(
        "Notification {} for {} resolved as {:?}",
        notification_id,
        user.key,
        outcome
    );

    let mut outbound = Vec::new();
    if !affected.is_empty() {
        outbound.push(Outbound::CaregiverAlert { affected, reason });
    }

    Ok((
        Confirmation::Applied {
            notification_id,
            outcome,
            medications,
        },
        outbound,
    ))
}
