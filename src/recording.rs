//! Recorded assistant streams for replay

use crate::agent::StreamEvent;
use crate::tools::validation::validate_tool_call_shape;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// A recorded response stream
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordingSession {
    /// Timestamp of when the recording was started
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub events: Vec<RecordedEvent>,
}

/// Single recorded event with timing info
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    /// A [`StreamEvent`], or an untyped `tool_use` record
    pub event: Value,
    /// Milliseconds since recording start
    pub timestamp_ms: u64,
}

impl RecordingSession {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording file {}", path.display()))?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse recording file")
    }

    /// Decode all events with their timestamps
    pub fn stream_events(&self) -> Result<Vec<(u64, StreamEvent)>> {
        let mut events = Vec::with_capacity(self.events.len());
        for (i, recorded) in self.events.iter().enumerate() {
            let decoded = decode_event(&recorded.event)
                .with_context(|| format!("Invalid event #{i} in recording"))?;
            events.extend(decoded.into_iter().map(|event| (recorded.timestamp_ms, event)));
        }
        Ok(events)
    }
}

/// Whole tool calls (from non-streaming providers) become a start/stop pair
fn decode_event(value: &Value) -> Result<Vec<StreamEvent>> {
    if value.get("type").and_then(Value::as_str) != Some("tool_use") {
        return Ok(vec![serde_json::from_value(value.clone())?]);
    }

    validate_tool_call_shape(value)?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let id = text("id");
    let arguments = value
        .get("input")
        .or_else(|| value.get("parameters"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    let partial = value.get("partial").and_then(Value::as_bool).unwrap_or(false);

    let mut events = vec![StreamEvent::ToolCallStart {
        id: id.clone(),
        name: text("name"),
        arguments,
    }];
    if !partial {
        events.push(StreamEvent::ToolCallStop { id });
    }
    Ok(events)
}
