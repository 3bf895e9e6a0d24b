//! Server log: the append-only record of service lifecycle events.
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::error::LogSinkError;

/// Number of entries `ServerLog` keeps in memory.
pub const DEFAULT_HISTORY: usize = 512;

/// Append-only sink for operator-facing lifecycle events.
pub trait LogSink: Send + Sync {
    /// Records a single event.
    fn record(&self, message: &str);
}

/// A timestamped server log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    fn render(&self) -> String {
        format!(
            "{} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}

/// Production log sink.
///
/// Entries are kept in a bounded in-memory history, mirrored to `tracing`, and
/// appended to `file` when one is configured. A failing file write is reported
/// through `tracing` and never surfaces to the caller.
pub struct ServerLog {
    history: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    file: Option<PathBuf>,
}

impl ServerLog {
    /// Creates an in-memory server log.
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_HISTORY,
            file: None,
        }
    }

    /// Creates a server log that also appends every entry to `path`.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            ..Self::new()
        }
    }

    /// Returns the in-memory history, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn append_to_file(path: &Path, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")
    }
}

impl Default for ServerLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for ServerLog {
    fn record(&self, message: &str) {
        info!(target: "archivectl::server_log", "{message}");

        let entry = LogEntry {
            timestamp: Local::now(),
            message: message.to_string(),
        };

        if let Some(path) = &self.file
            && let Err(err) = Self::append_to_file(path, &entry.render())
        {
            warn!("Failed to append to server log {}: {err}", path.display());
        }

        let mut history = match self.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(entry);
    }
}

/// Reads the last `lines` entries of a server log file.
pub fn tail(path: &Path, lines: usize) -> Result<Vec<String>, LogSinkError> {
    if !path.exists() {
        return Err(LogSinkError::LogUnavailable(path.display().to_string()));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_keeps_history_in_order() {
        let log = ServerLog::new();
        log.record("Starting DICOM Storage SCP");
        log.record("Stopping DICOM Storage SCP");

        let messages: Vec<String> =
            log.entries().into_iter().map(|entry| entry.message).collect();
        assert_eq!(
            messages,
            vec!["Starting DICOM Storage SCP", "Stopping DICOM Storage SCP"]
        );
    }

    #[test]
    fn history_is_bounded() {
        let log = ServerLog {
            capacity: 2,
            ..ServerLog::new()
        };
        log.record("one");
        log.record("two");
        log.record("three");

        let messages: Vec<String> =
            log.entries().into_iter().map(|entry| entry.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn record_appends_to_file_and_tail_reads_it_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/server.log");
        let log = ServerLog::with_file(&path);

        for i in 0..5 {
            log.record(&format!("event {i}"));
        }

        let last = tail(&path, 2).unwrap();
        assert_eq!(last.len(), 2);
        assert!(last[0].ends_with("event 3"));
        assert!(last[1].ends_with("event 4"));

        let everything = tail(&path, 100).unwrap();
        assert_eq!(everything.len(), 5);
    }

    #[test]
    fn tail_reports_missing_file() {
        let dir = tempdir().unwrap();
        let err = tail(&dir.path().join("missing.log"), 10).unwrap_err();
        assert!(matches!(err, LogSinkError::LogUnavailable(_)));
    }
}
