//! Job definition
//!
//! 필드는 비공개다. 상태는 `transition`으로만 움직이고 로그는 늘어나기만 한다.

use crate::log::LogEntry;
use crate::state::JobStatus;
use agentbox_foundation::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job (`job_<uuid>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random JobId
    pub fn new() -> Self {
        Self(format!("job_{}", Uuid::new_v4()))
    }

    /// Parse a caller-supplied id. Only `[A-Za-z0-9_-]` is accepted so an
    /// id can double as a directory or file name.
    pub fn parse(raw: &str) -> Result<Self> {
        let well_formed = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !well_formed {
            return Err(Error::Validation(format!("Malformed job id: {:?}", raw)));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A scheduled unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    id: JobId,
    status: JobStatus,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preview_url: Option<String>,
}

impl Job {
    /// New queued job with its first log line
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            status: JobStatus::Queued,
            description: description.into(),
            created_at: now,
            updated_at: now,
            logs: vec![LogEntry::info("Job scheduled successfully")],
            download_url: None,
            preview_url: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref()
    }

    pub fn preview_url(&self) -> Option<&str> {
        self.preview_url.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Move to `next`, recording `entry` alongside the status change.
    pub fn transition(&mut self, next: JobStatus, entry: LogEntry) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::invalid_transition(self.status, next));
        }
        self.status = next;
        self.logs.push(entry);
        self.touch();
        Ok(())
    }

    /// Logs may still be appended after a terminal state.
    pub fn append_log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
        self.touch();
    }

    pub fn set_download_url(&mut self, url: impl Into<String>) {
        self.download_url = Some(url.into());
        self.touch();
    }

    pub fn set_preview_url(&mut self, url: Option<String>) {
        self.preview_url = url;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job() {
        let job = Job::new("Build a counter");
        assert!(job.id().as_str().starts_with("job_"));
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.logs().len(), 1);
        assert_eq!(job.logs()[0].message, "Job scheduled successfully");
        assert!(job.updated_at() >= job.created_at());
    }

    #[test]
    fn test_transition_appends_log() {
        let mut job = Job::new("task");
        job.transition(JobStatus::Provisioning, LogEntry::info("Initializing"))
            .unwrap();
        assert_eq!(job.status(), JobStatus::Provisioning);
        assert_eq!(job.logs().len(), 2);
    }

    #[test]
    fn test_rejects_skipping() {
        let mut job = Job::new("task");
        let err = job
            .transition(JobStatus::Running, LogEntry::info("skip"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.logs().len(), 1);
    }

    #[test]
    fn test_logs_after_terminal() {
        let mut job = Job::new("task");
        job.transition(JobStatus::Canceled, LogEntry::warn("Canceled"))
            .unwrap();
        assert!(job
            .transition(JobStatus::Provisioning, LogEntry::info("x"))
            .is_err());
        job.append_log(LogEntry::info("late cleanup"));
        assert_eq!(job.logs().len(), 3);
    }

    #[test]
    fn test_job_id_parse() {
        assert!(JobId::parse("job_1234-abcd").is_ok());
        assert!(JobId::parse("../etc").is_err());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("a/b").is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let mut job = Job::new("task");
        job.set_download_url("/api/download/x");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["downloadUrl"], "/api/download/x");
        assert!(json.get("previewUrl").is_none());
        assert!(json.get("createdAt").is_some());
    }
}
