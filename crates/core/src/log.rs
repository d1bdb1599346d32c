//! Per-task log - timestamped lines a task records about itself.

use crate::Time;
use serde::{Deserialize, Serialize};

/// A single log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// When it was written
    pub timestamp: Time,

    /// What was written
    pub message: String,
}

/// Log owned by exactly one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskLog {
    entries: Vec<LogEntry>,
}

impl TaskLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line.
    pub fn write(&mut self, message: impl Into<String>) {
        self.entries.push(LogEntry {
            timestamp: chrono::Utc::now(),
            message: message.into(),
        });
    }

    /// Append every line of a captured tool output.
    pub fn write_block(&mut self, block: &str) {
        for line in block.lines() {
            self.write(line);
        }
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Check if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Last `count` lines joined with newlines.
    pub fn tail(&self, count: usize) -> String {
        let start = self.entries.len().saturating_sub(count);
        self.entries[start..]
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
