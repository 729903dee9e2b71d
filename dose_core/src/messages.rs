//! Message bodies for reminders, follow-ups, caregiver alerts and notices.

use crate::ScheduleEntry;
use chrono_tz::Tz;

const PRODUCT: &str = "Dosewatch";

/// First reminder for a bundle of due entries
pub fn reminder_body(entries: &[&ScheduleEntry], tz: Tz) -> String {
    let mut message = format!("{} Reminder\n\nIt's time to take:\n", PRODUCT);
    for entry in entries {
        let local = entry.scheduled_at.with_timezone(&tz);
        message.push_str(&format!(
            "\n• {} at {}",
            entry.prescription,
            local.format("%-I:%M %p")
        ));
    }
    message.push_str("\n\nReply:\nD - Taken\nS - Skip");
    message
}

/// Short summary stored on the notification
pub fn preview(medications: &[String]) -> String {
    format!("Reminder for {}", medications.join(", "))
}

/// Resend for an unanswered reminder
pub fn followup_body(medications: &[String]) -> String {
    format!(
        "It's time to take your medications: {}.\n\nPlease reply:\nD - if you have taken them\nS - if you need to skip this dose\n\nThank you for using {}.",
        medications.join(", "),
        PRODUCT
    )
}

/// Alert to a caregiver about a watched person's skipped or missed doses
pub fn caregiver_body(persons: &[&str], reason: &str, medications: &[&str]) -> String {
    let mut message = format!("⚠️ {} has {}:", persons.join(", "), reason);
    for name in medications {
        message.push_str(&format!("\n• {}", name));
    }
    message
}

/// Low supply or exhausted schedule notice
pub fn refill_body(prescription: &str, pills_left: u32, schedule_ended: bool) -> String {
    if schedule_ended {
        format!(
            "{}: your schedule for {} has ended with {} pills left. Please contact your pharmacy for a refill.",
            PRODUCT, prescription, pills_left
        )
    } else {
        format!(
            "{}: you have {} pills of {} left, less than two days of supply. Please arrange a refill.",
            PRODUCT, pills_left, prescription
        )
    }
}

/// End-of-course notice once a prescription runs out
pub fn course_finished_body(prescription: &str) -> String {
    format!(
        "{}: you have finished your course of {}. Reminders for it have stopped.",
        PRODUCT, prescription
    )
}
