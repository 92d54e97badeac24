//! Dead-letter sink
//!
//! Terminal failures are preserved here with enough context (original event,
//! error, attempt count, source coordinates) for inspection and replay. Sinks
//! are append-only and never retry on their own; the consumer loop retries a
//! failed `record` and holds the offset until it succeeds.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use event_schema::ListingEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::broker::{EventPublisher, SourceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Decode,
    UnsupportedVersion,
    Validation,
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::UnsupportedVersion => "unsupported_version",
            FailureKind::Validation => "validation",
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OriginalEvent {
    Decoded(ListingEvent),
    /// Bytes that could not be decoded, kept verbatim
    Raw(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub original_event: OriginalEvent,
    /// Event ID, or the record coordinates when decoding failed
    pub event_id: String,
    pub last_error: String,
    pub error_kind: FailureKind,
    pub attempt_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry<'a> {
    event_id: &'a str,
    original_event: serde_json::Value,
    last_error: &'a str,
    error_kind: FailureKind,
    attempt_count: u32,
    first_failed_at: DateTime<Utc>,
    topic: &'a str,
    partition: i32,
    offset: i64,
}

impl DeadLetterEntry {
    pub fn new(
        record: &SourceRecord,
        original_event: OriginalEvent,
        event_id: impl Into<String>,
        error_kind: FailureKind,
        last_error: impl Into<String>,
        attempt_count: u32,
        first_failed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            original_event,
            event_id: event_id.into(),
            last_error: last_error.into(),
            error_kind,
            attempt_count,
            first_failed_at,
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
        }
    }

    /// JSON document written by every durable sink.
    ///
    /// A decoded event is embedded as its wire envelope so it can be re-published
    /// as is; undecodable bytes become `{"raw": "<base64>"}`.
    pub fn to_json(&self) -> Result<Vec<u8>, DeadLetterError> {
        let original_event = match &self.original_event {
            OriginalEvent::Decoded(event) => {
                let bytes = event_schema::encode(event)
                    .map_err(|e| DeadLetterError::Serialization(e.to_string()))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| DeadLetterError::Serialization(e.to_string()))?
            }
            OriginalEvent::Raw(bytes) => serde_json::json!({
                "raw": base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        };

        let wire = WireEntry {
            event_id: &self.event_id,
            original_event,
            last_error: &self.last_error,
            error_kind: self.error_kind,
            attempt_count: self.attempt_count,
            first_failed_at: self.first_failed_at,
            topic: &self.topic,
            partition: self.partition,
            offset: self.offset,
        };

        serde_json::to_vec(&wire).map_err(|e| DeadLetterError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DeadLetterError {
    #[error("Failed to serialize dead-letter entry: {0}")]
    Serialization(String),

    #[error("Dead-letter storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError>;
}

/// Dead-letter topic, keyed by event ID
pub struct TopicDeadLetterSink {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

impl TopicDeadLetterSink {
    pub fn new(publisher: Arc<dyn EventPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for TopicDeadLetterSink {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let bytes = entry.to_json()?;

        self.publisher
            .send(&self.topic, &entry.event_id, &bytes)
            .await
            .map_err(|e| DeadLetterError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// JSON-lines file; each entry is flushed and synced before `record` returns
pub struct FileDeadLetterSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl FileDeadLetterSink {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for FileDeadLetterSink {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let mut line = entry.to_json()?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        let io = |e: std::io::Error| DeadLetterError::Unavailable(e.to_string());

        file.write_all(&line).await.map_err(io)?;
        file.flush().await.map_err(io)?;
        file.sync_data().await.map_err(io)?;
        Ok(())
    }
}

/// Keeps entries in memory; can be told to fail to exercise retry paths
#[derive(Default)]
pub struct MemoryDeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
    fail_next: AtomicU32,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeadLetterError::Unavailable("injected sink failure".to_string()));
        }

        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::ListingPayload;

    fn record() -> SourceRecord {
        SourceRecord {
            topic: "listing.events".to_string(),
            partition: 1,
            offset: 7,
            key: None,
            payload: b"{not json".to_vec(),
        }
    }

    fn raw_entry() -> DeadLetterEntry {
        let record = record();
        DeadLetterEntry::new(
            &record,
            OriginalEvent::Raw(record.payload.clone()),
            record.coordinates(),
            FailureKind::Decode,
            "Malformed message: expected value",
            0,
            Utc::now(),
        )
    }

    #[test]
    fn test_raw_entry_json() {
        let json: serde_json::Value = serde_json::from_slice(&raw_entry().to_json().unwrap()).unwrap();

        assert_eq!(json["eventId"], "listing.events-1-7");
        assert_eq!(json["errorKind"], "decode");
        assert_eq!(json["attemptCount"], 0);
        assert_eq!(json["offset"], 7);

        let raw = json["originalEvent"]["raw"].as_str().unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(raw).unwrap();
        assert_eq!(bytes, b"{not json");
    }

    #[test]
    fn test_decoded_entry_embeds_envelope() {
        let event = ListingEvent::new(ListingPayload {
            district: Some("Downtown".to_string()),
            area_sqm: Some(-10.0),
            ..Default::default()
        });
        let entry = DeadLetterEntry::new(
            &record(),
            OriginalEvent::Decoded(event.clone()),
            event.event_id.clone(),
            FailureKind::Validation,
            "area_sqm = -10 (expected > 0)",
            0,
            Utc::now(),
        );

        let bytes = entry.to_json().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let envelope = serde_json::to_vec(&json["originalEvent"]).unwrap();

        assert_eq!(event_schema::decode(&envelope).unwrap(), event);
        assert_eq!(json["errorKind"], "validation");
    }

    #[tokio::test]
    async fn test_topic_sink() {
        let broker = crate::memory::MemoryBroker::new(1);
        let sink = TopicDeadLetterSink::new(broker.clone(), "listing.valuation.dlq");

        sink.record(&raw_entry()).await.unwrap();
        broker.fail_next_sends(1);
        assert!(sink.record(&raw_entry()).await.is_err());

        let messages = broker.messages("listing.valuation.dlq");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some("listing.events-1-7"));
    }

    #[tokio::test]
    async fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq").join("entries.jsonl");

        let sink = FileDeadLetterSink::open(&path).await.unwrap();
        sink.record(&raw_entry()).await.unwrap();
        sink.record(&raw_entry()).await.unwrap();
        drop(sink);

        // reopening appends instead of truncating
        let sink = FileDeadLetterSink::open(&path).await.unwrap();
        sink.record(&raw_entry()).await.unwrap();

        let contents = tokio::fs::read_to_string(sink.path()).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines
            .iter()
            .all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
    }

    #[tokio::test]
    async fn test_memory_sink_failure_injection() {
        let sink = MemoryDeadLetterSink::new();
        sink.fail_next(2);

        assert!(sink.record(&raw_entry()).await.is_err());
        assert!(sink.record(&raw_entry()).await.is_err());
        assert!(sink.record(&raw_entry()).await.is_ok());
        assert_eq!(sink.entries().len(), 1);
    }
}
