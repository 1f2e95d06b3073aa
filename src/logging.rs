//! Append-only JSONL event log.
//!
//! One [`SharedLogger`] is opened for the whole process and one per agent
//! session. Each line is a serialized [`LogEntry`]. Writes to a sink are
//! serialized by its mutex; independent sinks never contend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

/// A single JSONL file opened for append. `None` writer means closed or
/// disabled; entries are then dropped.
pub struct Logger {
    file_path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl Logger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            file_path: Some(file_path),
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    fn disabled() -> Self {
        Self {
            file_path: None,
            writer: None,
            written: 0,
        }
    }

    pub fn log(&mut self, entry: &LogEntry) {
        let Some(ref mut writer) = self.writer else {
            return;
        };
        if let Ok(json) = serde_json::to_string(entry) {
            if writeln!(writer, "{}", json).is_ok() {
                self.written += 1;
            }
            // Error lines reach disk immediately.
            if entry.level == LogLevel::Error {
                let _ = writer.flush();
            }
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self.writer {
            Some(ref mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn close(&mut self) -> std::io::Result<()> {
        let result = self.flush();
        self.writer = None;
        result
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    /// A logger that accepts and discards every entry.
    pub fn disabled() -> Self {
        Self(Arc::new(Mutex::new(Logger::disabled())))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut logger) = self.0.lock() {
            logger.log(&entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn debug(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(LogEntry::new(level, component, message).with_context(context));
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.0.lock().ok().and_then(|l| l.file_path.clone())
    }

    /// Number of lines successfully written so far.
    pub fn written(&self) -> u64 {
        self.0.lock().map(|l| l.written).unwrap_or(0)
    }

    pub fn flush(&self) {
        if let Ok(mut logger) = self.0.lock() {
            if let Err(e) = logger.flush() {
                tracing::warn!(error = %e, "Failed to flush log sink");
            }
        }
    }

    pub fn close(&self) {
        if let Ok(mut logger) = self.0.lock() {
            if let Err(e) = logger.close() {
                tracing::warn!(error = %e, "Failed to close log sink");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.jsonl");

        let logger = SharedLogger::new(&path).unwrap();
        logger.info("server", "first");
        logger.log_with_context(
            LogLevel::Warn,
            "retry",
            "second",
            serde_json::json!({"attempt": 2}),
        );
        logger.close();
        logger.info("server", "after close is dropped");

        let content = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<LogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert_eq!(entries[1].context, Some(serde_json::json!({"attempt": 2})));
        assert_eq!(logger.written(), 2);
    }

    #[test]
    fn test_reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.jsonl");

        for message in ["one", "two"] {
            let logger = SharedLogger::new(&path).unwrap();
            logger.info("test", message);
            logger.flush();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_disabled_logger_discards() {
        let logger = SharedLogger::disabled();
        logger.error("x", "y");
        assert_eq!(logger.written(), 0);
        assert!(logger.path().is_none());
    }
}
