//! Host Logging Abstraction
//!
//! Lets hosts mirror the core's structured logs into their own pipelines
//! (OSLog, Logcat, a debug console overlay, ...).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase directive understood by `tracing` filters.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    pub message: String,
    /// Stream the event belongs to, lifted out of the `stream_key` field.
    pub stream_key: Option<String>,
    /// Remaining structured fields
    pub fields: HashMap<String, String>,
    /// Name of the enclosing span
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            stream_key: None,
            fields: HashMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = Some(key.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }
}

/// Logger sink trait
///
/// Implementations must not block: entries are forwarded from whatever
/// thread emitted the event.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Flush any buffered logs
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Entries below this level are dropped before they reach the sink.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Sink that keeps the most recent entries in memory.
///
/// Useful for diagnostics screens and for asserting on logs in tests.
#[derive(Debug)]
pub struct MemoryLogger {
    min_level: LogLevel,
    capacity: usize,
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    pub fn new(min_level: LogLevel, capacity: usize) -> Self {
        Self {
            min_level,
            capacity: capacity.max(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Retained entries that belong to `stream_key`.
    pub fn entries_for_stream(&self, stream_key: &str) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.stream_key.as_deref() == Some(stream_key))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for MemoryLogger {
    fn default() -> Self {
        Self::new(LogLevel::Debug, 512)
    }
}

#[async_trait::async_trait]
impl LoggerSink for MemoryLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.remove(0);
        }
        entries.push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}
