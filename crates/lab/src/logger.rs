use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::LabError;

/// One recorded simulation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: String,
    pub payload: Value,
}

/// Append-only in-memory event log with JSON Lines export.
#[derive(Debug, Clone, Default)]
pub struct SimLogger {
    events: Vec<LogEvent>,
}

impl SimLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, event_type: impl Into<String>, actor: impl Into<String>, payload: Value) {
        self.events.push(LogEvent {
            event_type: event_type.into(),
            actor: actor.into(),
            payload,
        });
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    /// Write one JSON object per line, overwriting `path`.
    pub fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<(), LabError> {
        let mut out = BufWriter::new(std::fs::File::create(path.as_ref())?);
        for event in &self.events {
            serde_json::to_writer(&mut out, event)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        tracing::debug!(path = %path.as_ref().display(), events = self.events.len(), "exported events");
        Ok(())
    }
}
