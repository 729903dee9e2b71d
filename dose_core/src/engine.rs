//! The reminder engine: per-user transitions over an aggregate store.
//!
//! Every operation runs as a read-modify-write cycle on one user aggregate:
//! load, apply a pure transition, save with a version check, and only then
//! dispatch the side effects the transition produced. Cycles on the same
//! user are serialized in-process by [`KeyedLocks`]; across processes the
//! store's version check turns a lost race into a retry.

use crate::caregivers::{CaregiverNotifier, TextCaregiverNotifier};
use crate::channel::MessageChannel;
use crate::escalation::{self, Confirmation};
use crate::inbound::{parse_call_input, parse_text_reply};
use crate::inventory::check_inventory;
use crate::locks::KeyedLocks;
use crate::outbound::{dispatch, DispatchSummary, Outbound};
use crate::planner::{rebuild_if_stale, rebuild_user_schedule};
use crate::store::{validate_key, AggregateStore};
use crate::{
    Caregiver, Config, ConversationState, DeliveryChannel, Error, Outcome, Prescription, Result,
    UserAggregate, UserStatus,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Totals of one periodic pass over all users
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub users_processed: usize,
    pub notifications_created: usize,
    /// Unsent entries closed as skipped for being too late to remind about
    pub stale_closed: usize,
    pub schedules_rebuilt: usize,
    pub resends: usize,
    pub auto_skipped: usize,
    pub failed_notifications: usize,
    pub refill_notices: usize,
    pub course_notices: usize,
    pub courses_completed: usize,
    pub messages_delivered: usize,
    pub caregivers_alerted: usize,
    /// Users whose cycle failed; other users were still processed
    pub errors: usize,
}

impl TickReport {
    pub fn merge(&mut self, other: &TickReport) {
        self.users_processed += other.users_processed;
        self.notifications_created += other.notifications_created;
        self.stale_closed += other.stale_closed;
        self.schedules_rebuilt += other.schedules_rebuilt;
        self.resends += other.resends;
        self.auto_skipped += other.auto_skipped;
        self.failed_notifications += other.failed_notifications;
        self.refill_notices += other.refill_notices;
        self.course_notices += other.course_notices;
        self.courses_completed += other.courses_completed;
        self.messages_delivered += other.messages_delivered;
        self.caregivers_alerted += other.caregivers_alerted;
        self.errors += other.errors;
    }

    fn record_dispatch(&mut self, summary: &DispatchSummary) {
        self.messages_delivered += summary.delivered;
        self.caregivers_alerted += summary.caregivers_alerted;
    }
}

/// Scheduling, escalation and inventory over a store of user aggregates
pub struct ReminderEngine<S: AggregateStore> {
    store: S,
    channel: Arc<dyn MessageChannel>,
    caregivers: Arc<dyn CaregiverNotifier>,
    config: Config,
    locks: KeyedLocks,
}

impl<S: AggregateStore> ReminderEngine<S> {
    /// Create an engine that alerts caregivers by text over `channel`
    pub fn new(store: S, channel: Arc<dyn MessageChannel>, config: Config) -> Self {
        let caregivers = Arc::new(TextCaregiverNotifier::new(Arc::clone(&channel)));
        Self::with_caregiver_notifier(store, channel, caregivers, config)
    }

    pub fn with_caregiver_notifier(
        store: S,
        channel: Arc<dyn MessageChannel>,
        caregivers: Arc<dyn CaregiverNotifier>,
        config: Config,
    ) -> Self {
        Self {
            store,
            channel,
            caregivers,
            config,
            locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load one user or fail with `NotFound`
    pub fn load_user(&self, key: &str) -> Result<UserAggregate> {
        self.store
            .load_user(key)?
            .ok_or_else(|| Error::NotFound(format!("user {}", key)))
    }

    /// One serialized read-modify-write cycle
    ///
    /// `f` may run more than once when the save loses a version race, so it
    /// must only touch the aggregate it is given. Outbound items of a failed
    /// attempt are discarded; only the persisted attempt is dispatched.
    fn update_user<R>(
        &self,
        key: &str,
        mut f: impl FnMut(&mut UserAggregate) -> Result<(R, Vec<Outbound>)>,
    ) -> Result<(R, DispatchSummary)> {
        self.locks.with_key(key, || {
            let mut retries = 0;
            loop {
                let loaded = self.load_user(key)?;
                let mut user = loaded.clone();
                let (value, outbound) = f(&mut user)?;

                if user != loaded {
                    match self.store.save_user(&mut user) {
                        Ok(()) => {}
                        Err(Error::Conflict {
                            expected, found, ..
                        }) if retries < self.config.store.max_conflict_retries => {
                            retries += 1;
                            tracing::warn!(
                                "Version conflict on {} (expected {}, found {}), retry {}",
                                key,
                                expected,
                                found,
                                retries
                            );
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }

                let summary = dispatch(
                    self.channel.as_ref(),
                    self.caregivers.as_ref(),
                    &user,
                    outbound,
                );
                return Ok((value, summary));
            }
        })
    }

    /// Apply `f` to every stored user, isolating per-user failures
    fn for_each_user(
        &self,
        label: &str,
        f: impl Fn(&mut UserAggregate) -> (TickReport, Vec<Outbound>),
    ) -> TickReport {
        let mut report = TickReport::default();

        let keys = match self.store.user_keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("Failed to list users for {}: {}", label, e);
                report.errors += 1;
                return report;
            }
        };

        for key in keys {
            match self.update_user(&key, |user| Ok(f(user))) {
                Ok((user_report, summary)) => {
                    report.merge(&user_report);
                    report.record_dispatch(&summary);
                    report.users_processed += 1;
                }
                Err(e) => {
                    tracing::error!("{} failed for {}: {}", label, key, e);
                    report.errors += 1;
                }
            }
        }

        tracing::debug!("{} pass complete: {:?}", label, report);
        report
    }

    // ------------------------------------------------------------------------
    // Periodic passes
    // ------------------------------------------------------------------------

    /// Create and send reminders for entries that are due
    pub fn run_due_reminders(&self, now: DateTime<Utc>) -> TickReport {
        self.for_each_user("due reminders", |user| self.due_reminders(user, now))
    }

    /// Advance unanswered notifications along the escalation timeline
    pub fn run_escalations(&self, now: DateTime<Utc>) -> TickReport {
        self.for_each_user("escalation", |user| self.escalations(user, now))
    }

    /// Refill and end-of-course checks
    pub fn run_inventory_checks(&self, now: DateTime<Utc>) -> TickReport {
        self.for_each_user("inventory", |user| self.inventory(user, now))
    }

    /// All three passes in one cycle per user
    ///
    /// The first tick of each local day also rebuilds the user's schedule.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let report = self.for_each_user("tick", |user| {
            // Close first so stale entries hold no pills during the rebuild
            let closed = escalation::close_stale_entries(user, now, &self.config.escalation);
            let rebuilt = rebuild_if_stale(user, now, &self.config.schedule).is_some();
            let (mut report, mut outbound) = self.due_reminders(user, now);
            report.stale_closed += closed;
            report.schedules_rebuilt += usize::from(rebuilt);
            for (step, items) in [self.escalations(user, now), self.inventory(user, now)] {
                report.merge(&step);
                outbound.extend(items);
            }
            (report, outbound)
        });
        tracing::info!(
            "Tick at {}: {} users, {} reminders, {} closed late, {} resends, {} auto-skipped, {} errors",
            now,
            report.users_processed,
            report.notifications_created,
            report.stale_closed,
            report.resends,
            report.auto_skipped,
            report.errors
        );
        report
    }

    fn due_reminders(&self, user: &mut UserAggregate, now: DateTime<Utc>) -> (TickReport, Vec<Outbound>) {
        let stale_closed = escalation::close_stale_entries(user, now, &self.config.escalation);
        let outbound = escalation::create_due_notifications(
            user,
            now,
            &self.config.escalation,
            &self.config.schedule,
        );
        let report = TickReport {
            notifications_created: outbound.len(),
            stale_closed,
            ..TickReport::default()
        };
        (report, outbound)
    }

    fn escalations(&self, user: &mut UserAggregate, now: DateTime<Utc>) -> (TickReport, Vec<Outbound>) {
        let (step, outbound) = escalation::escalate(user, now, &self.config.escalation);
        let report = TickReport {
            resends: step.resends,
            auto_skipped: step.auto_skipped,
            failed_notifications: step.failed,
            ..TickReport::default()
        };
        (report, outbound)
    }

    fn inventory(&self, user: &mut UserAggregate, now: DateTime<Utc>) -> (TickReport, Vec<Outbound>) {
        let (step, outbound) = check_inventory(user, now, &self.config.inventory);
        let report = TickReport {
            refill_notices: step.refill_notices,
            course_notices: step.course_notices,
            courses_completed: usize::from(step.course_completed),
            ..TickReport::default()
        };
        (report, outbound)
    }

    // ------------------------------------------------------------------------
    // Confirmations
    // ------------------------------------------------------------------------

    /// Answer one notification of `key`
    pub fn apply_confirmation(
        &self,
        key: &str,
        notification_id: Uuid,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Confirmation> {
        let (confirmation, _) = self.update_user(key, |user| {
            escalation::apply_confirmation(user, notification_id, outcome, now)
        })?;
        Ok(confirmation)
    }

    /// Answer the most recent pending notification of `key`
    pub fn confirm_latest(&self, key: &str, outcome: Outcome, now: DateTime<Utc>) -> Result<Confirmation> {
        let (confirmation, _) =
            self.update_user(key, |user| escalation::confirm_latest(user, outcome, now))?;
        Ok(confirmation)
    }

    /// Handle an inbound text; `None` when the text is not a confirmation
    pub fn handle_text_reply(
        &self,
        key: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Confirmation>> {
        match parse_text_reply(text) {
            Some(outcome) => self.confirm_latest(key, outcome, now).map(Some),
            None => {
                tracing::debug!("Ignoring reply {:?} from {}", text, key);
                Ok(None)
            }
        }
    }

    /// Handle keypad or speech input from an interactive call
    ///
    /// Calls carry the notification they were placed for; without one the
    /// latest pending notification is answered.
    pub fn handle_call_input(
        &self,
        key: &str,
        notification_id: Option<Uuid>,
        digits: &str,
        speech: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Confirmation>> {
        let Some(outcome) = parse_call_input(digits, speech) else {
            tracing::debug!("Unrecognized call input from {}: {:?} {:?}", key, digits, speech);
            return Ok(None);
        };
        match notification_id {
            Some(id) => self.apply_confirmation(key, id, outcome, now).map(Some),
            None => self.confirm_latest(key, outcome, now).map(Some),
        }
    }

    // ------------------------------------------------------------------------
    // Schedule and administration
    // ------------------------------------------------------------------------

    /// Replace pending future entries; returns entries added
    pub fn rebuild_schedule(&self, key: &str, now: DateTime<Utc>) -> Result<usize> {
        let (added, _) = self.update_user(key, |user| {
            Ok((rebuild_user_schedule(user, now, &self.config.schedule), Vec::new()))
        })?;
        Ok(added)
    }

    /// Start a fresh course of `prescription` with `count` pills
    pub fn restock(&self, key: &str, prescription: &str, count: u32, now: DateTime<Utc>) -> Result<usize> {
        let (added, _) = self.update_user(key, |user| {
            let p = user
                .prescription_mut(prescription)
                .ok_or_else(|| Error::NotFound(format!("prescription {}", prescription)))?;
            p.restock(count);
            if user.status == UserStatus::CourseCompleted {
                user.status = UserStatus::Active;
            }
            tracing::info!("Restocked {} for {} with {} pills", prescription, key, count);
            Ok((rebuild_user_schedule(user, now, &self.config.schedule), Vec::new()))
        })?;
        Ok(added)
    }

    /// Persist a new user; fails if the key is taken
    pub fn register_user(&self, mut user: UserAggregate) -> Result<UserAggregate> {
        validate_key(&user.key)?;
        let key = user.key.clone();
        self.locks.with_key(&key, || {
            if self.store.load_user(&key)?.is_some() {
                return Err(Error::Validation(format!("user {} is already registered", key)));
            }
            user.version = 0;
            self.store.save_user(&mut user).map_err(|e| match e {
                Error::Conflict { .. } => {
                    Error::Validation(format!("user {} is already registered", key))
                }
                other => other,
            })?;
            tracing::info!("Registered user {}", key);
            Ok(user)
        })
    }

    /// Add a prescription and schedule it; returns entries added
    pub fn add_prescription(&self, key: &str, prescription: Prescription, now: DateTime<Utc>) -> Result<usize> {
        let (added, _) = self.update_user(key, |user| {
            if user.prescription(&prescription.name).is_some() {
                return Err(Error::Validation(format!(
                    "prescription {} already exists for {}",
                    prescription.name, key
                )));
            }
            user.prescriptions.push(prescription.clone());
            Ok((rebuild_user_schedule(user, now, &self.config.schedule), Vec::new()))
        })?;
        Ok(added)
    }

    pub fn add_caregiver(&self, key: &str, caregiver: Caregiver) -> Result<()> {
        self.update_user(key, |user| {
            if user.caregivers.iter().any(|c| c.phone == caregiver.phone) {
                return Err(Error::Validation(format!(
                    "caregiver {} already added for {}",
                    caregiver.phone, key
                )));
            }
            user.caregivers.push(caregiver.clone());
            Ok(((), Vec::new()))
        })?;
        Ok(())
    }

    /// Set the reminder channel, or toggle it when `channel` is `None`
    pub fn set_channel(&self, key: &str, channel: Option<DeliveryChannel>) -> Result<DeliveryChannel> {
        let (channel, _) = self.update_user(key, |user| {
            user.channel = channel.unwrap_or_else(|| user.channel.toggled());
            Ok((user.channel, Vec::new()))
        })?;
        tracing::info!("Reminder channel for {} is now {:?}", key, channel);
        Ok(channel)
    }

    /// Pause or resume reminders for one prescription
    pub fn set_reminders(
        &self,
        key: &str,
        prescription: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let (added, _) = self.update_user(key, |user| {
            let p = user
                .prescription_mut(prescription)
                .ok_or_else(|| Error::NotFound(format!("prescription {}", prescription)))?;
            p.reminders_enabled = enabled;
            Ok((rebuild_user_schedule(user, now, &self.config.schedule), Vec::new()))
        })?;
        Ok(added)
    }

    /// Change the account status and rebuild the schedule for it
    pub fn set_status(&self, key: &str, status: UserStatus, now: DateTime<Utc>) -> Result<usize> {
        let (added, _) = self.update_user(key, |user| {
            user.status = status;
            user.conversation = ConversationState::Idle;
            Ok((rebuild_user_schedule(user, now, &self.config.schedule), Vec::new()))
        })?;
        Ok(added)
    }
}
