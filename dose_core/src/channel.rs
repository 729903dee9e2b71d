//! Outbound message channel and the JSONL outbox.
//!
//! Every text and call request is appended as one JSON line to an outbox
//! file with file locking, so a separate relay can hand it to the telephony
//! provider. Delivery errors never propagate into a tick.

use crate::DeliveryChannel;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Errors reported by a message channel
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The telephony provider refused the call; the reminder falls back to text
    #[error("call not accepted")]
    CallNotAccepted,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound message channel
pub trait MessageChannel: Send + Sync {
    /// Send a text message, returning a delivery reference
    fn send_text(&self, recipient: &str, body: &str) -> Result<String, ChannelError>;

    /// Place an interactive call whose answers resolve `notification_id`
    fn place_interactive_call(
        &self,
        recipient: &str,
        notification_id: Uuid,
    ) -> Result<String, ChannelError>;
}

/// How a reminder actually went out
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Text(String),
    Call(String),
    /// The call was refused and the reminder was texted instead
    FallbackText(String),
}

/// Send a reminder over the preferred channel, falling back from call to text
pub fn deliver_reminder<C: MessageChannel + ?Sized>(
    channel: &C,
    preferred: DeliveryChannel,
    recipient: &str,
    notification_id: Uuid,
    body: &str,
) -> Result<Delivery, ChannelError> {
    match preferred {
        DeliveryChannel::Text => channel.send_text(recipient, body).map(Delivery::Text),
        DeliveryChannel::Call => match channel.place_interactive_call(recipient, notification_id) {
            Ok(call_ref) => Ok(Delivery::Call(call_ref)),
            Err(ChannelError::CallNotAccepted) => {
                tracing::info!("Call to {} not accepted, falling back to text", recipient);
                channel.send_text(recipient, body).map(Delivery::FallbackText)
            }
            Err(e) => {
                tracing::warn!("Call to {} failed: {}. Falling back to text", recipient, e);
                channel.send_text(recipient, body).map(Delivery::FallbackText)
            }
        },
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Kind of outbox record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutboxKind {
    Text,
    Call,
}

/// One queued outbound message or call
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub kind: OutboxKind,
    pub recipient: String,
    pub body: Option<String>,
    pub notification_id: Option<Uuid>,
    pub queued_at: DateTime<Utc>,
}

/// JSONL-based channel with file locking
pub struct OutboxChannel {
    path: PathBuf,
    calls_enabled: bool,
}

impl OutboxChannel {
    /// Create an outbox at `path`. Without call support every call is refused.
    pub fn new(path: impl Into<PathBuf>, calls_enabled: bool) -> Self {
        Self {
            path: path.into(),
            calls_enabled,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &OutboxRecord) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);

        file.unlock()?;

        tracing::debug!("Queued {:?} {} for {}", record.kind, record.id, record.recipient);
        Ok(())
    }

    fn queue(
        &self,
        kind: OutboxKind,
        recipient: &str,
        body: Option<&str>,
        notification_id: Option<Uuid>,
    ) -> Result<String, ChannelError> {
        let record = OutboxRecord {
            id: Uuid::new_v4(),
            kind,
            recipient: recipient.to_string(),
            body: body.map(str::to_string),
            notification_id,
            queued_at: Utc::now(),
        };
        self.append(&record)
            .map_err(|e| ChannelError::Delivery(e.to_string()))?;
        Ok(record.id.to_string())
    }
}

impl MessageChannel for OutboxChannel {
    fn send_text(&self, recipient: &str, body: &str) -> Result<String, ChannelError> {
        self.queue(OutboxKind::Text, recipient, Some(body), None)
    }

    fn place_interactive_call(
        &self,
        recipient: &str,
        notification_id: Uuid,
    ) -> Result<String, ChannelError> {
        if !self.calls_enabled {
            return Err(ChannelError::CallNotAccepted);
        }
        self.queue(OutboxKind::Call, recipient, None, Some(notification_id))
    }
}

/// Read all records from an outbox file, skipping corrupt lines
pub fn read_outbox(path: &Path) -> crate::Result<Vec<OutboxRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<OutboxRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse outbox record at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_text_appends_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");
        let channel = OutboxChannel::new(&path, false);

        channel.send_text("15550001111", "Time for Aspirin").unwrap();
        channel.send_text("15550002222", "Time for Metformin").unwrap();

        let records = read_outbox(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, OutboxKind::Text);
        assert_eq!(records[1].recipient, "15550002222");
    }

    #[test]
    fn test_call_refused_falls_back_to_text() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");
        let channel = OutboxChannel::new(&path, false);

        let delivery = deliver_reminder(
            &channel,
            DeliveryChannel::Call,
            "15550001111",
            Uuid::new_v4(),
            "Time for Aspirin",
        )
        .unwrap();

        assert!(matches!(delivery, Delivery::FallbackText(_)));
        let records = read_outbox(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, OutboxKind::Text);
    }

    #[test]
    fn test_call_accepted_queues_call() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");
        let channel = OutboxChannel::new(&path, true);
        let notification_id = Uuid::new_v4();

        let delivery = deliver_reminder(
            &channel,
            DeliveryChannel::Call,
            "15550001111",
            notification_id,
            "Time for Aspirin",
        )
        .unwrap();

        assert!(matches!(delivery, Delivery::Call(_)));
        let records = read_outbox(&path).unwrap();
        assert_eq!(records[0].kind, OutboxKind::Call);
        assert_eq!(records[0].notification_id, Some(notification_id));
    }

    #[test]
    fn test_corrupt_lines_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");
        let channel = OutboxChannel::new(&path, false);
        channel.send_text("15550001111", "hello").unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{ not json").unwrap();
        channel.send_text("15550001111", "again").unwrap();

        assert_eq!(read_outbox(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_outbox_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(read_outbox(&temp_dir.path().join("none.jsonl")).unwrap().is_empty());
    }
}
