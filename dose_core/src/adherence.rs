//! Adherence summaries and CSV export of resolved schedule entries.

use crate::{EntryStatus, Result, UserAggregate};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;

/// Per-prescription adherence counts
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdherenceSummary {
    pub prescription: String,
    pub taken: usize,
    pub skipped: usize,
    pub pending: usize,
    /// Taken over resolved entries, `None` before anything is resolved
    pub rate: Option<f64>,
}

/// Summarize every prescription of `user`, in prescription order
pub fn summarize(user: &UserAggregate) -> Vec<AdherenceSummary> {
    user.prescriptions
        .iter()
        .map(|p| {
            let mut summary = AdherenceSummary {
                prescription: p.name.clone(),
                taken: 0,
                skipped: 0,
                pending: 0,
                rate: None,
            };
            for entry in user.schedule.iter().filter(|e| e.prescription == p.name) {
                match entry.status {
                    EntryStatus::Taken => summary.taken += 1,
                    EntryStatus::Skipped => summary.skipped += 1,
                    EntryStatus::Pending => summary.pending += 1,
                }
            }
            let resolved = summary.taken + summary.skipped;
            if resolved > 0 {
                summary.rate = Some(summary.taken as f64 / resolved as f64);
            }
            summary
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct CsvRow {
    user: String,
    entry_id: String,
    prescription: String,
    scheduled_at: String,
    dosage: u32,
    status: &'static str,
    taken_at: Option<String>,
}

/// Append resolved entries of `user` to a CSV file
///
/// Headers are written only when the file is empty. Returns rows written.
pub fn export_csv(user: &UserAggregate, csv_path: &Path) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(csv_path)?;
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    let mut rows = 0;
    for entry in user.schedule.iter() {
        let status = match entry.status {
            EntryStatus::Taken => "taken",
            EntryStatus::Skipped => "skipped",
            EntryStatus::Pending => continue,
        };
        writer.serialize(CsvRow {
            user: user.key.clone(),
            entry_id: entry.id.to_string(),
            prescription: entry.prescription.clone(),
            scheduled_at: entry.scheduled_at.to_rfc3339(),
            dosage: entry.dosage,
            status,
            taken_at: entry.taken_at.map(|t| t.to_rfc3339()),
        })?;
        rows += 1;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Exported {} entries for {} to {:?}", rows, user.key, csv_path);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Prescription, ScheduleEntry};
    use chrono::{Duration, TimeZone, Utc};

    fn user_with_history() -> UserAggregate {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut user = UserAggregate::new("alice", "Alice", "15550001111", t0);
        user.prescriptions
            .push(Prescription::new("Aspirin", "Alice", 1, 2, 10, ""));
        user.prescriptions
            .push(Prescription::new("Metformin", "Alice", 1, 1, 10, ""));

        for (i, status) in [EntryStatus::Taken, EntryStatus::Taken, EntryStatus::Skipped, EntryStatus::Pending]
            .into_iter()
            .enumerate()
        {
            let mut entry = ScheduleEntry::pending("Aspirin", t0 + Duration::hours(12 * i as i64), 1);
            entry.status = status;
            if status == EntryStatus::Taken {
                entry.taken_at = Some(entry.scheduled_at + Duration::minutes(5));
            }
            user.schedule.push(entry);
        }
        user
    }

    #[test]
    fn test_summarize_counts_and_rate() {
        let summary = summarize(&user_with_history());

        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].taken, 2);
        assert_eq!(summary[0].skipped, 1);
        assert_eq!(summary[0].pending, 1);
        let rate = summary[0].rate.unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);

        assert_eq!(summary[1].prescription, "Metformin");
        assert_eq!(summary[1].rate, None);
    }

    #[test]
    fn test_export_csv_appends_without_duplicate_headers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("reports/adherence.csv");
        let user = user_with_history();

        assert_eq!(export_csv(&user, &csv_path).unwrap(), 3);
        assert_eq!(export_csv(&user, &csv_path).unwrap(), 3);

        let contents = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].starts_with("user,entry_id,prescription"));
        assert_eq!(lines.iter().filter(|l| l.starts_with("user,")).count(), 1);
        assert!(contents.contains(",skipped,"));
    }
}
