//! Job log - append-only entries visible to the caller
//!
//! 작업 로그는 tracing과 별개다. `LogSink`를 통해 오케스트레이터가
//! 진행 상황을 기록하고, 상태 조회 쪽에서 그대로 읽어간다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Kind of a job log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Error,
    Warn,
    Success,
    /// An interactive command the caller issued
    Command,
    /// Output of that command
    Output,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Error => "error",
            LogKind::Warn => "warn",
            LogKind::Success => "success",
            LogKind::Command => "command",
            LogKind::Output => "output",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LogKind::Error)
    }
}

/// A single log entry (immutable once appended)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            kind,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogKind::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogKind::Error, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogKind::Warn, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogKind::Success, message)
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::new(LogKind::Command, message)
    }

    pub fn output(message: impl Into<String>) -> Self {
        Self::new(LogKind::Output, message)
    }
}

/// Destination for job progress lines
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log(&self, entry: LogEntry);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

#[async_trait]
impl LogSink for NullLogSink {
    async fn log(&self, _entry: LogEntry) {}
}

/// Keeps entries in memory (tests, dry runs)
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn log(&self, entry: LogEntry) {
        self.entries.lock().push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_kind_as_type() {
        let entry = LogEntry::success("done");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["message"], "done");
    }

    #[tokio::test]
    async fn test_memory_sink_preserves_order() {
        let sink = MemoryLogSink::new();
        sink.log(LogEntry::info("one")).await;
        sink.log(LogEntry::error("two")).await;
        assert_eq!(sink.messages(), vec!["one", "two"]);
        assert!(sink.entries()[1].kind.is_error());
    }
}
