//! Terminal sessions - 대화형 명령어 기록

use agentbox_foundation::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// One interactively executed command. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecution {
    pub id: String,
    pub command: String,
    pub output: String,
    pub exit_code: i64,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds
    pub duration: u64,
}

impl CommandExecution {
    pub fn new(command: impl Into<String>, output: impl Into<String>, exit_code: i64, elapsed: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            output: output.into(),
            exit_code,
            timestamp: Utc::now(),
            duration: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Named sequence of commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub commands: Vec<CommandExecution>,
    pub is_active: bool,
}

impl TerminalSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            commands: Vec::new(),
            is_active: true,
        }
    }
}

impl Default for TerminalSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Sessions of one job
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, TerminalSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> TerminalSession {
        let session = TerminalSession::new();
        self.sessions.write().insert(session.id.clone(), session.clone());
        session
    }

    /// Existing id, or a new session when `None`
    pub fn resolve(&self, id: Option<&str>) -> Result<String> {
        match id {
            Some(id) => {
                let sessions = self.sessions.read();
                match sessions.get(id) {
                    Some(session) if session.is_active => Ok(id.to_string()),
                    Some(_) => Err(Error::Validation(format!("Terminal session {} is closed", id))),
                    None => Err(Error::NotFound(format!("Terminal session {}", id))),
                }
            }
            None => Ok(self.create().id),
        }
    }

    pub fn record(&self, id: &str, execution: CommandExecution) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Terminal session {}", id)))?;
        session.commands.push(execution);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TerminalSession> {
        self.sessions.read().get(id).cloned()
    }

    /// Mark inactive; history is kept
    pub fn close(&self, id: &str) -> Result<TerminalSession> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Terminal session {}", id)))?;
        session.is_active = false;
        Ok(session.clone())
    }

    /// All sessions, oldest first
    pub fn list(&self) -> Vec<TerminalSession> {
        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_creates_or_finds() {
        let registry = SessionRegistry::new();
        let id = registry.resolve(None).unwrap();
        assert_eq!(registry.resolve(Some(&id)).unwrap(), id);
        assert!(matches!(registry.resolve(Some("missing")), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_record_and_close() {
        let registry = SessionRegistry::new();
        let session = registry.create();
        registry
            .record(&session.id, CommandExecution::new("ls", "a\n", 0, Duration::from_millis(12)))
            .unwrap();

        let closed = registry.close(&session.id).unwrap();
        assert!(!closed.is_active);
        assert_eq!(closed.commands.len(), 1);
        assert_eq!(closed.commands[0].duration, 12);
        assert!(registry.resolve(Some(&session.id)).is_err());
    }

    #[test]
    fn test_serialized_field_names() {
        let exec = CommandExecution::new("ls", "", 2, Duration::ZERO);
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["exitCode"], 2);
        assert!(json.get("timestamp").is_some());
    }
}
