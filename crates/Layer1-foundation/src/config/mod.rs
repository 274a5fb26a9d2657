//! Config - 통합 설정 관리
//!
//! - `agentbox.rs` - AgentboxConfig 통합 설정 (workspace, executor, context, sandbox)

mod agentbox;

pub use agentbox::{
    AgentboxConfig, ContextSettings, ExecutorSettings, SandboxPorts, SandboxSettings,
    WorkspaceSettings, AGENTBOX_CONFIG_FILE, WORKSPACE_ROOT_ENV,
};
