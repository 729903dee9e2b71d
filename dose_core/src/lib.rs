#![forbid(unsafe_code)]

//! Core domain model and business logic for the Dosewatch reminder system.
//!
//! This crate provides:
//! - Domain types (prescriptions, schedule entries, notifications, users)
//! - Dose-time synthesis, schedule materialization and conflict resolution
//! - The notification escalation state machine and inventory ledger
//! - Persistence (per-user JSON documents, JSONL outbox, CSV export)
//! - The reminder engine tying these together per user

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod clock;
pub mod dose_times;
pub mod conflicts;
pub mod materialize;
pub mod planner;
pub mod messages;
pub mod channel;
pub mod caregivers;
pub mod outbound;
pub mod escalation;
pub mod inventory;
pub mod inbound;
pub mod adherence;
pub mod store;
pub mod locks;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use channel::{MessageChannel, OutboxChannel};
pub use caregivers::{CaregiverNotifier, TextCaregiverNotifier};
pub use escalation::Confirmation;
pub use store::{AggregateStore, FileStore, MemoryStore};
pub use engine::{ReminderEngine, TickReport};
