//! Replay input
//!
//! A JSON-lines file where each line is either a full wire envelope (for
//! example an `originalEvent` taken from a dead-letter entry) or a bare
//! payload. Blank lines and `#` comments are skipped. Replayed events always
//! receive a fresh event ID so they are never mistaken for the original.

use event_schema::{ListingEvent, ListingPayload};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Failed to read replay file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {message}")]
    InvalidLine { line: usize, message: String },
}

pub fn parse_replay(contents: &str) -> Result<Vec<ListingEvent>, ReplayError> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            parse_line(line).map_err(|message| ReplayError::InvalidLine {
                line: line_no,
                message,
            })
        })
        .collect()
}

pub async fn read_replay_file(path: impl AsRef<Path>) -> Result<Vec<ListingEvent>, ReplayError> {
    let contents = tokio::fs::read_to_string(path).await?;
    parse_replay(&contents)
}

fn parse_line(line: &str) -> Result<ListingEvent, String> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;

    let payload = if value.get("schemaVersion").is_some() {
        event_schema::decode(line.as_bytes())
            .map_err(|e| e.to_string())?
            .payload
    } else {
        serde_json::from_value::<ListingPayload>(value).map_err(|e| e.to_string())?
    };

    Ok(ListingEvent::new(payload))
}
