//! Caregiver fan-out for skipped and missed doses.

use crate::channel::MessageChannel;
use crate::messages::caregiver_body;
use crate::{Caregiver, UserAggregate};
use std::sync::Arc;

/// Why caregivers are being alerted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertReason {
    /// The user answered "skip"
    Skipped,
    /// The reminder went unanswered until the escalation timeout
    Missed,
}

impl AlertReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertReason::Skipped => "skipped",
            AlertReason::Missed => "missed",
        }
    }
}

/// A medication affected by a skip, with the person it was prescribed for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffectedMedication {
    pub name: String,
    pub person: String,
}

/// Caregiver notifier collaborator
///
/// Best-effort: failures are logged, never returned to the transition.
pub trait CaregiverNotifier: Send + Sync {
    /// Alert every watching caregiver once; returns how many were alerted
    fn notify_caregivers(
        &self,
        user: &UserAggregate,
        affected: &[AffectedMedication],
        reason: AlertReason,
    ) -> usize;
}

/// Caregivers with notifications enabled who watch at least one affected person,
/// each paired with the medications they should hear about
pub fn watching_caregivers<'a, 'b>(
    caregivers: &'a [Caregiver],
    affected: &'b [AffectedMedication],
) -> Vec<(&'a Caregiver, Vec<&'b AffectedMedication>)> {
    caregivers
        .iter()
        .filter(|c| c.notifications_enabled)
        .filter_map(|caregiver| {
            let meds: Vec<_> = affected
                .iter()
                .filter(|m| caregiver.watched_persons.iter().any(|p| p == &m.person))
                .collect();
            if meds.is_empty() {
                None
            } else {
                Some((caregiver, meds))
            }
        })
        .collect()
}

/// Sends one text per watching caregiver over a message channel
pub struct TextCaregiverNotifier {
    channel: Arc<dyn MessageChannel>,
}

impl TextCaregiverNotifier {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self { channel }
    }
}

impl CaregiverNotifier for TextCaregiverNotifier {
    fn notify_caregivers(
        &self,
        user: &UserAggregate,
        affected: &[AffectedMedication],
        reason: AlertReason,
    ) -> usize {
        let mut alerted = 0;

        for (caregiver, meds) in watching_caregivers(&user.caregivers, affected) {
            let mut persons: Vec<&str> = meds.iter().map(|m| m.person.as_str()).collect();
            persons.dedup();
            let names: Vec<&str> = meds.iter().map(|m| m.name.as_str()).collect();
            let body = caregiver_body(&persons, reason.as_str(), &names);

            match self.channel.send_text(&caregiver.phone, &body) {
                Ok(_) => {
                    tracing::info!(
                        "Caregiver {} notified of {} dose for {}",
                        caregiver.name,
                        reason.as_str(),
                        user.key
                    );
                    alerted += 1;
                }
                Err(e) => tracing::warn!("Failed to notify caregiver {}: {}", caregiver.name, e),
            }
        }

        alerted
    }
}
