//! Append-only JSON-lines event log used by the patrol loop's tailer.
//!
//! An application-level event stream (`done`, `merged`, `merge_failed`,
//! `session_death`, `kill`) written by workers and read by the witness's
//! reactor loop. The tailer tracks a byte offset rather than re-reading the
//! whole file on every poll.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed event line: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, EventLogError>;

/// Reaction kinds the patrol loop's reactor dispatches on (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Done,
    Merged,
    MergeFailed,
    SessionDeath,
    Kill,
    Nudge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub actor: String,
    pub payload: serde_json::Value,
}

impl EventLogEntry {
    pub fn new(event_type: EventType, actor: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            actor: actor.into(),
            payload,
        }
    }
}

/// Append a single entry to the log file, creating it if necessary.
pub fn append(path: impl AsRef<Path>, entry: &EventLogEntry) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(entry).expect("serialize event log entry");
    writeln!(file, "{line}")?;
    Ok(())
}

/// Tracks a read offset into an append-only event log so repeated polls
/// only return newly appended lines.
pub struct EventLogTailer {
    path: PathBuf,
    offset: u64,
}

impl EventLogTailer {
    /// Start tailing from the current end of the file (skip history).
    pub fn from_tail(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(Self { path, offset })
    }

    /// Start tailing from the beginning (replay full history on first poll).
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Read and parse any lines appended since the last poll. Malformed
    /// lines are skipped with a warning rather than aborting the tail.
    pub fn poll(&mut self) -> Result<Vec<EventLogEntry>> {
        let Ok(mut file) = std::fs::File::open(&self.path) else {
            return Ok(Vec::new());
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            // File was truncated/rotated underneath us; restart from 0.
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;
        let reader = BufReader::new(&file);
        let mut out = Vec::new();
        let mut consumed = 0u64;
        for line in reader.lines() {
            let line = line?;
            consumed += line.len() as u64 + 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventLogEntry>(&line) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    tracing::warn!(error = %e, line = %line, "skipping malformed event log line");
                }
            }
        }
        self.offset += consumed;
        Ok(out)
    }
}
