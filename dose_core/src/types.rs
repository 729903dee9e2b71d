//! Core domain types for the Dosewatch system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Prescriptions and their inventory ledger
//! - Schedule entries (dated dose occurrences)
//! - Notifications and their escalation state
//! - Caregivers and the per-user aggregate that owns all of the above

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Status Types
// ============================================================================

/// How reminders reach the user
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    #[default]
    Text,
    Call,
}

impl DeliveryChannel {
    pub fn toggled(self) -> Self {
        match self {
            DeliveryChannel::Text => DeliveryChannel::Call,
            DeliveryChannel::Call => DeliveryChannel::Text,
        }
    }
}

/// Lifecycle of a single dose occurrence. `Pending` is the only non-terminal state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Pending,
    Taken,
    Skipped,
}

/// Lifecycle of a reminder. Everything except `Pending` is terminal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Taken,
    Skipped,
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }
}

/// A user's answer to a reminder
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Taken,
    Skipped,
}

impl From<Outcome> for NotificationStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Taken => NotificationStatus::Taken,
            Outcome::Skipped => NotificationStatus::Skipped,
        }
    }
}

impl From<Outcome> for EntryStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Taken => EntryStatus::Taken,
            Outcome::Skipped => EntryStatus::Skipped,
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "taken" => Ok(Outcome::Taken),
            "skipped" | "skip" => Ok(Outcome::Skipped),
            other => Err(crate::Error::Validation(format!(
                "unknown outcome '{}', expected taken or skipped",
                other
            ))),
        }
    }
}

/// Account status of a user aggregate
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Paused,
    Inactive,
    /// Every prescription ran out and was reported; history is kept
    CourseCompleted,
}

impl std::str::FromStr for UserStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "paused" => Ok(UserStatus::Paused),
            "inactive" => Ok(UserStatus::Inactive),
            other => Err(crate::Error::Validation(format!(
                "unknown status '{}', expected active, paused or inactive",
                other
            ))),
        }
    }
}

/// Where a user is in the inbound text dialogue
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingReminderSelection,
    SelectingMedicationForTime,
    EnteringCustomTime {
        prescription: String,
    },
    SelectingMedicationsToPause,
}

// ============================================================================
// Prescription and Inventory Types
// ============================================================================

/// Counters mutated by confirmation and escalation transitions
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InventoryLedger {
    pub pill_count: u32,
    pub daily_consumption: u32,
    pub skipped_count: u32,
}

/// A medication the user takes on a schedule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prescription {
    /// Unique per owner
    pub name: String,
    /// Person the medication is for; matched against caregivers' watched persons
    pub assigned_person: String,
    /// Units per dose
    pub dosage: u32,
    pub doses_per_day: u8,
    #[serde(default)]
    pub instructions: String,
    pub initial_count: u32,
    pub reminders_enabled: bool,
    pub ledger: InventoryLedger,
    #[serde(default)]
    pub refill_notified: bool,
    #[serde(default)]
    pub finished_notified: bool,
}

// ============================================================================
// Schedule and Notification Types
// ============================================================================

/// One concrete, dated occurrence of a dose-time
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub id: Uuid,
    /// Name of the owning prescription
    pub prescription: String,
    pub scheduled_at: DateTime<Utc>,
    pub dosage: u32,
    pub status: EntryStatus,
    pub taken_at: Option<DateTime<Utc>>,
    /// Set once a notification has been created for this entry
    #[serde(default)]
    pub reminder_sent: bool,
}

impl ScheduleEntry {
    pub fn pending(prescription: &str, scheduled_at: DateTime<Utc>, dosage: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            prescription: prescription.to_string(),
            scheduled_at,
            dosage,
            status: EntryStatus::Pending,
            taken_at: None,
            reminder_sent: false,
        }
    }
}

/// One outbound reminder bundling one or more due schedule entries
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub body_preview: String,
    pub medications: Vec<String>,
    pub entry_ids: Vec<Uuid>,
    pub status: NotificationStatus,
    pub resend_count: u8,
    pub channel: DeliveryChannel,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Caregiver and Aggregate Types
// ============================================================================

/// Someone alerted when a watched person skips or misses a dose
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Caregiver {
    pub name: String,
    pub phone: String,
    pub watched_persons: Vec<String>,
    pub notifications_enabled: bool,
}

/// All persisted state owned by one end user; the unit of storage and of locking
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAggregate {
    pub key: String,
    pub name: String,
    pub phone: String,
    pub wake_time: String,
    pub sleep_time: String,
    pub timezone: String,
    #[serde(default)]
    pub channel: DeliveryChannel,
    #[serde(default)]
    pub status: UserStatus,
    pub notifications_enabled: bool,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub caregivers: Vec<Caregiver>,
    #[serde(default)]
    pub conversation: ConversationState,
    /// Incremented by every successful save
    #[serde(default)]
    pub version: u64,
    /// Local date of the last schedule rebuild
    #[serde(default)]
    pub last_rebuilt: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl UserAggregate {
    pub fn new(key: &str, name: &str, phone: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            phone: phone.to_string(),
            wake_time: String::new(),
            sleep_time: String::new(),
            timezone: String::new(),
            channel: DeliveryChannel::Text,
            status: UserStatus::Active,
            notifications_enabled: true,
            prescriptions: Vec::new(),
            schedule: Vec::new(),
            notifications: Vec::new(),
            caregivers: Vec::new(),
            conversation: ConversationState::Idle,
            version: 0,
            last_rebuilt: None,
            created_at,
        }
    }

    pub fn prescription(&self, name: &str) -> Option<&Prescription> {
        self.prescriptions.iter().find(|p| p.name == name)
    }

    pub fn prescription_mut(&mut self, name: &str) -> Option<&mut Prescription> {
        self.prescriptions.iter_mut().find(|p| p.name == name)
    }

    pub fn entry(&self, id: Uuid) -> Option<&ScheduleEntry> {
        self.schedule.iter().find(|e| e.id == id)
    }

    pub fn notification(&self, id: Uuid) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    /// The most recently sent notification still awaiting an answer
    pub fn latest_pending_notification(&self) -> Option<&Notification> {
        self.notifications
            .iter()
            .filter(|n| n.status == NotificationStatus::Pending)
            .max_by_key(|n| n.sent_at)
    }

    /// The most recently sent notification that was taken or skipped
    pub fn latest_answered_notification(&self) -> Option<&Notification> {
        self.notifications
            .iter()
            .filter(|n| {
                matches!(
                    n.status,
                    NotificationStatus::Taken | NotificationStatus::Skipped
                )
            })
            .max_by_key(|n| n.sent_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn notification(sent_at: DateTime<Utc>, status: NotificationStatus) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            sent_at,
            body_preview: String::new(),
            medications: vec![],
            entry_ids: vec![],
            status,
            resend_count: 0,
            channel: DeliveryChannel::Text,
            resolved_at: None,
        }
    }

    #[test]
    fn test_latest_pending_picks_most_recent() {
        let now = Utc::now();
        let mut user = UserAggregate::new("15550001111", "Ada", "15550001111", now);
        let old = notification(now - Duration::minutes(90), NotificationStatus::Pending);
        let answered = notification(now - Duration::minutes(10), NotificationStatus::Taken);
        let recent = notification(now - Duration::minutes(30), NotificationStatus::Pending);
        let recent_id = recent.id;
        user.notifications = vec![old, answered, recent];

        assert_eq!(user.latest_pending_notification().unwrap().id, recent_id);
    }

    #[test]
    fn test_conversation_state_is_tagged() {
        let state = ConversationState::EnteringCustomTime {
            prescription: "Metformin".into(),
        };
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(
            json,
            r#"{"step":"entering_custom_time","prescription":"Metformin"}"#
        );

        let idle: ConversationState = serde_json::from_str(r#"{"step":"idle"}"#).unwrap();
        assert_eq!(idle, ConversationState::Idle);
    }

    #[test]
    fn test_outcome_parsing() {
        assert_eq!("Taken".parse::<Outcome>().unwrap(), Outcome::Taken);
        assert_eq!(" skip ".parse::<Outcome>().unwrap(), Outcome::Skipped);
        assert!("maybe".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!NotificationStatus::Pending.is_terminal());
        assert!(NotificationStatus::Taken.is_terminal());
        assert!(NotificationStatus::Skipped.is_terminal());
        assert!(NotificationStatus::Failed.is_terminal());
    }
}
