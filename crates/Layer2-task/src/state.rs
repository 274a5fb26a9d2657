//! Job state machine
//!
//! ```text
//! Queued → Provisioning → Running → Completed
//!              │             └────→ Failed
//!              └──────────────────→ Failed
//! (any non-terminal) ─────────────→ Canceled
//! ```

use serde::{Deserialize, Serialize};

/// Possible states of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Scheduled, waiting for a worker
    Queued,

    /// Workspace is being prepared
    Provisioning,

    /// Generator is running
    Running,

    /// Project generated and packaged
    Completed,

    /// Unrecoverable error
    Failed,

    /// Canceled by the caller
    Canceled,
}

impl JobStatus {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Check if the job is still being processed
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Provisioning | JobStatus::Running)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Queued, Provisioning) => true,
            (Provisioning, Running) | (Provisioning, Failed) => true,
            (Running, Completed) | (Running, Failed) => true,
            (from, Canceled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Provisioning => "provisioning",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Get a symbol for the state (for CLI output)
    pub fn symbol(&self) -> &'static str {
        match self {
            JobStatus::Queued => "◎",
            JobStatus::Provisioning => "◌",
            JobStatus::Running => "⟳",
            JobStatus::Completed => "✓",
            JobStatus::Failed => "✗",
            JobStatus::Canceled => "⊘",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    const ALL: [JobStatus; 6] = [Queued, Provisioning, Running, Completed, Failed, Canceled];

    #[test]
    fn test_forward_path() {
        assert!(Queued.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Provisioning.can_transition_to(Failed));
    }

    #[test]
    fn test_no_skipping() {
        assert!(!Queued.can_transition_to(Running));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Failed));
        assert!(!Provisioning.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Provisioning));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [Completed, Failed, Canceled] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_cancel_from_any_non_terminal() {
        for from in [Queued, Provisioning, Running] {
            assert!(from.can_transition_to(Canceled));
        }
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Provisioning).unwrap(), "\"provisioning\"");
        let parsed: JobStatus = serde_json::from_str("\"canceled\"").unwrap();
        assert_eq!(parsed, Canceled);
    }
}
