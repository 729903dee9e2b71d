//! Side effects produced by state transitions.
//!
//! Transitions on a user aggregate only describe what must be sent. The
//! engine dispatches these after the aggregate has been saved, so a retried
//! read-modify-write never sends anything twice.

use crate::caregivers::{AffectedMedication, AlertReason, CaregiverNotifier};
use crate::channel::{deliver_reminder, Delivery, MessageChannel};
use crate::{DeliveryChannel, UserAggregate};
use uuid::Uuid;

/// Something to send once the owning transition is persisted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A reminder or follow-up for a notification, sent to the user
    Reminder {
        notification_id: Uuid,
        channel: DeliveryChannel,
        body: String,
    },
    /// Fan-out to caregivers watching the affected medications
    CaregiverAlert {
        affected: Vec<AffectedMedication>,
        reason: AlertReason,
    },
    /// A plain text notice to the user
    Notice { body: String },
}

/// Counts of what a dispatch pass achieved
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub fallbacks: usize,
    pub failed: usize,
    pub caregivers_alerted: usize,
}

/// Send every outbound item; failures are logged and counted, never returned
pub fn dispatch(
    channel: &dyn MessageChannel,
    notifier: &dyn CaregiverNotifier,
    user: &UserAggregate,
    items: Vec<Outbound>,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();

    for item in items {
        match item {
            Outbound::Reminder {
                notification_id,
                channel: preferred,
                body,
            } => match deliver_reminder(channel, preferred, &user.phone, notification_id, &body) {
                Ok(delivery) => {
                    if matches!(delivery, Delivery::FallbackText(_)) {
                        summary.fallbacks += 1;
                    }
                    summary.delivered += 1;
                    tracing::debug!("Reminder {} delivered: {:?}", notification_id, delivery);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        "Reminder {} to {} failed: {}",
                        notification_id,
                        user.key,
                        e
                    );
                }
            },
            Outbound::CaregiverAlert { affected, reason } => {
                summary.caregivers_alerted += notifier.notify_caregivers(user, &affected, reason);
            }
            Outbound::Notice { body } => match channel.send_text(&user.phone, &body) {
                Ok(_) => summary.delivered += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!("Notice to {} failed: {}", user.key, e);
                }
            },
        }
    }

    summary
}
