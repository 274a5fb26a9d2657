//! Container runtime abstraction
//!
//! SandboxManager는 이 trait만 보고 동작한다. 실제 구현은 `DockerRuntime`,
//! 테스트에서는 메모리 기반 가짜 런타임을 끼운다.

use agentbox_foundation::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// host port → container port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
}

/// Everything needed to start one sandbox
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Runtime-visible name, also used as the handle for every later call
    pub name: String,
    pub image: String,
    /// Host directory bind-mounted read-write
    pub workspace: PathBuf,
    pub mount_path: String,
    pub ports: Vec<PortBinding>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Result of a command run inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// stdout and stderr interleaved as received
    pub output: String,
    pub exit_code: i64,
}

/// Narrow interface over a container engine.
///
/// Calls on a container that does not exist return `Error::NotFound`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &'static str;

    /// Create and start a container, returns the runtime id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn is_running(&self, container: &str) -> Result<bool>;

    async fn stop(&self, container: &str) -> Result<()>;

    /// Force remove (kills remaining processes)
    async fn remove(&self, container: &str) -> Result<()>;

    async fn exec(&self, container: &str, command: &str) -> Result<ExecOutput>;

    /// Copy one host file to `container_path` (full destination file path)
    async fn copy_in(&self, container: &str, host_path: &Path, container_path: &str)
        -> Result<()>;

    /// Copy one container file to `host_path` (full destination file path)
    async fn copy_out(&self, container: &str, container_path: &str, host_path: &Path)
        -> Result<()>;

    async fn logs(&self, container: &str, tail: Option<usize>) -> Result<String>;

    /// Names of containers (any state) whose name starts with `prefix`
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
