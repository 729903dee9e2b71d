//! Inventory ledger operations and the daily supply checks.
//!
//! The ledger is only mutated by confirmation/escalation transitions and by
//! explicit restocks. Two daily checks read it: a one-time refill notice when
//! supply drops below the configured number of days (or the schedule ran out
//! while pills remain), and a one-time end-of-course notice once fewer pills
//! remain than one dose needs.

use crate::config::InventoryConfig;
use crate::dose_times::clamp_doses_per_day;
use crate::messages::{course_finished_body, refill_body};
use crate::outbound::Outbound;
use crate::{
    ConversationState, EntryStatus, InventoryLedger, Prescription, UserAggregate, UserStatus,
};
use chrono::{DateTime, Utc};

impl InventoryLedger {
    pub fn new(pill_count: u32) -> Self {
        Self {
            pill_count,
            daily_consumption: 0,
            skipped_count: 0,
        }
    }

    /// A dose was confirmed taken
    pub fn record_taken(&mut self, dosage: u32) {
        self.pill_count = self.pill_count.saturating_sub(dosage);
        self.daily_consumption = self.daily_consumption.saturating_add(dosage);
    }

    /// A dose was skipped or missed
    pub fn record_skipped(&mut self) {
        self.skipped_count += 1;
    }

    /// Start a new course with `pill_count` pills
    pub fn reset(&mut self, pill_count: u32) {
        *self = Self::new(pill_count);
    }
}

impl Prescription {
    pub fn new(
        name: &str,
        assigned_person: &str,
        dosage: u32,
        doses_per_day: u8,
        initial_count: u32,
        instructions: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            assigned_person: assigned_person.to_string(),
            dosage,
            doses_per_day: clamp_doses_per_day(doses_per_day),
            instructions: instructions.to_string(),
            initial_count,
            reminders_enabled: true,
            ledger: InventoryLedger::new(initial_count),
            refill_notified: false,
            finished_notified: false,
        }
    }

    /// Pills consumed per day at the prescribed rate
    pub fn daily_requirement(&self) -> u32 {
        self.dosage.saturating_mul(u32::from(self.doses_per_day))
    }

    /// Not enough pills left for one more dose
    pub fn is_exhausted(&self) -> bool {
        self.ledger.pill_count == 0 || self.ledger.pill_count < self.dosage
    }

    /// Days the remaining pills last at the prescribed rate
    pub fn days_of_supply(&self) -> f64 {
        let daily = self.daily_requirement();
        if daily == 0 {
            return f64::INFINITY;
        }
        f64::from(self.ledger.pill_count) / f64::from(daily)
    }

    /// Replace the inventory with a fresh course
    pub fn restock(&mut self, count: u32) {
        self.initial_count = count;
        self.ledger.reset(count);
        self.refill_notified = false;
        self.finished_notified = false;
    }
}

/// What a daily inventory check did for one user
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventoryReport {
    pub refill_notices: usize,
    pub course_notices: usize,
    pub course_completed: bool,
}

/// Run the refill and end-of-course checks against one aggregate
pub fn check_inventory(
    user: &mut UserAggregate,
    now: DateTime<Utc>,
    config: &InventoryConfig,
) -> (InventoryReport, Vec<Outbound>) {
    let mut report = InventoryReport::default();
    let mut outbound = Vec::new();
    let low_days = f64::from(config.low_supply_days);
    let active = user.status == UserStatus::Active;

    for index in 0..user.prescriptions.len() {
        let name = user.prescriptions[index].name.clone();
        let has_future_entries = user.schedule.iter().any(|e| {
            e.prescription == name && e.status == EntryStatus::Pending && e.scheduled_at > now
        });

        let prescription = &mut user.prescriptions[index];
        let pills = prescription.ledger.pill_count;

        if prescription.is_exhausted() {
            if !prescription.finished_notified {
                prescription.finished_notified = true;
                report.course_notices += 1;
                tracing::info!("Prescription {} for {} is exhausted", name, user.key);
                outbound.push(Outbound::Notice {
                    body: course_finished_body(&name),
                });
            }
            continue;
        }

        if prescription.refill_notified {
            continue;
        }

        let low_supply = prescription.days_of_supply() < low_days;
        let schedule_ended = active && prescription.reminders_enabled && !has_future_entries;

        if low_supply || schedule_ended {
            prescription.refill_notified = true;
            report.refill_notices += 1;
            tracing::info!(
                "Refill needed for {} ({} pills, schedule ended: {})",
                name,
                pills,
                schedule_ended && !low_supply
            );
            outbound.push(Outbound::Notice {
                body: refill_body(&name, pills, schedule_ended && !low_supply),
            });
        }
    }

    if active
        && !user.prescriptions.is_empty()
        && user
            .prescriptions
            .iter()
            .all(|p| p.is_exhausted() && p.finished_notified)
    {
        user.status = UserStatus::CourseCompleted;
        user.conversation = ConversationState::Idle;
        report.course_completed = true;
        tracing::info!("All courses completed for {}", user.key);
    }

    (report, outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScheduleEntry;
    use chrono::Duration;

    fn user_with(prescriptions: Vec<Prescription>) -> UserAggregate {
        let mut user = UserAggregate::new("15550001111", "Ada", "15550001111", Utc::now());
        user.prescriptions = prescriptions;
        user
    }

    #[test]
    fn test_ledger_taken_saturates() {
        let mut ledger = InventoryLedger::new(1);
        ledger.record_taken(2);
        assert_eq!(ledger.pill_count, 0);
        assert_eq!(ledger.daily_consumption, 2);
    }

    #[test]
    fn test_low_supply_notice_sent_once() {
        let now = Utc::now();
        let mut p = Prescription::new("Aspirin", "Ada", 1, 2, 20, "");
        p.ledger.pill_count = 3; // 1.5 days
        let mut user = user_with(vec![p]);
        user.schedule
            .push(ScheduleEntry::pending("Aspirin", now + Duration::hours(2), 1));

        let (report, outbound) = check_inventory(&mut user, now, &InventoryConfig::default());
        assert_eq!(report.refill_notices, 1);
        assert_eq!(outbound.len(), 1);
        assert!(user.prescriptions[0].refill_notified);

        let (report, outbound) = check_inventory(&mut user, now, &InventoryConfig::default());
        assert_eq!(report.refill_notices, 0);
        assert!(outbound.is_empty());
    }

    #[test]
    fn test_plenty_of_supply_no_notice() {
        let now = Utc::now();
        let mut user = user_with(vec![Prescription::new("Aspirin", "Ada", 1, 2, 20, "")]);
        user.schedule
            .push(ScheduleEntry::pending("Aspirin", now + Duration::hours(2), 1));

        let (report, _) = check_inventory(&mut user, now, &InventoryConfig::default());
        assert_eq!(report, InventoryReport::default());
    }

    #[test]
    fn test_schedule_ended_triggers_refill() {
        let now = Utc::now();
        let mut user = user_with(vec![Prescription::new("Aspirin", "Ada", 1, 2, 20, "")]);

        let (report, outbound) = check_inventory(&mut user, now, &InventoryConfig::default());
        assert_eq!(report.refill_notices, 1);
        match &outbound[0] {
            Outbound::Notice { body } => assert!(body.contains("has ended")),
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[test]
    fn test_exhausted_course_completes_user() {
        let now = Utc::now();
        let mut p = Prescription::new("Amoxicillin", "Ada", 1, 3, 21, "");
        p.ledger.pill_count = 0;
        let mut user = user_with(vec![p]);

        let (report, outbound) = check_inventory(&mut user, now, &InventoryConfig::default());
        assert_eq!(report.course_notices, 1);
        assert!(report.course_completed);
        assert_eq!(outbound.len(), 1);
        assert_eq!(user.status, UserStatus::CourseCompleted);

        // History is kept
        assert_eq!(user.prescriptions.len(), 1);
    }

    #[test]
    fn test_restock_resets_course() {
        let mut p = Prescription::new("Aspirin", "Ada", 1, 2, 20, "");
        p.ledger.record_taken(5);
        p.ledger.record_skipped();
        p.refill_notified = true;
        p.restock(30);

        assert_eq!(p.initial_count, 30);
        assert_eq!(p.ledger, InventoryLedger::new(30));
        assert!(!p.refill_notified);
    }

    #[test]
    fn test_leftover_below_one_dose_ends_course() {
        let now = Utc::now();
        let mut p = Prescription::new("Metformin", "Ada", 2, 1, 5, "");
        p.ledger.record_taken(2);
        p.ledger.record_taken(2);
        let mut user = user_with(vec![p]);

        let (report, outbound) = check_inventory(&mut user, now, &InventoryConfig::default());

        assert_eq!(report.course_notices, 1);
        assert_eq!(report.refill_notices, 0);
        assert!(report.course_completed);
        assert_eq!(outbound.len(), 1);
        assert_eq!(user.status, UserStatus::CourseCompleted);
        assert_eq!(user.prescriptions[0].ledger.pill_count, 1);
    }

    #[test]
    fn test_daily_requirement_saturates() {
        let p = Prescription::new("Aspirin", "Ada", u32::MAX, 4, 10, "");
        assert_eq!(p.daily_requirement(), u32::MAX);
        assert!(p.days_of_supply() < 1.0);
    }
}
