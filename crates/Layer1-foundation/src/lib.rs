//! # agentbox-foundation
//!
//! Foundation layer for agentbox:
//! - Error: 공통 에러 타입과 분류 (Validation, NotFound, Security, ...)
//! - Config: 통합 설정 (AgentboxConfig)
//! - Storage: JsonStore (설정, 작업 레코드)
//! - Sync: 작업 단위 키 락 (KeyedLocks)

pub mod config;
pub mod error;
pub mod storage;
pub mod sync;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, ErrorKind, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    AgentboxConfig, ContextSettings, ExecutorSettings, SandboxPorts, SandboxSettings,
    WorkspaceSettings, AGENTBOX_CONFIG_FILE, WORKSPACE_ROOT_ENV,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::JsonStore;

// ============================================================================
// Sync
// ============================================================================
pub use sync::{KeyedGuard, KeyedLocks};
