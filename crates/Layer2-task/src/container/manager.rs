//! Sandbox Manager - one container per job
//!
//! Features:
//! - 작업별 직렬화 (KeyedLocks): 같은 작업의 생성/중지/상태 갱신이 겹치지 않음
//! - 생성 요청은 멱등: starting/running 컨테이너가 있으면 그대로 반환
//! - 겹치지 않는 포트 할당, 실패 시 반환
//! - 생성 후 비동기 상태 확인 (starting → running | error)
//! - 정리 작업은 부분 실패 목록을 돌려준다

use super::ports::PortAllocator;
use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, PortBinding};
use agentbox_foundation::{Error, KeyedLocks, Result, SandboxPorts, SandboxSettings};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a sandbox container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl ContainerStatus {
    /// Starting or running
    pub fn is_live(&self) -> bool {
        matches!(self, ContainerStatus::Starting | ContainerStatus::Running)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContainerStatus::Starting => "starting",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of a job's sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub container_id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub ports: SandboxPorts,
    pub vnc_url: String,
    pub jupyter_url: String,
    pub dev_url: String,
    pub logs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// One container that could not be removed during cleanup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub container: String,
    pub error: String,
}

/// Outcome of `cleanup_all_containers`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sandbox Manager
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: SandboxSettings,
    ports: PortAllocator,
    containers: RwLock<HashMap<String, ContainerInfo>>,
    locks: KeyedLocks,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: SandboxSettings) -> Self {
        let ports = PortAllocator::new(settings.host_base_ports);
        Self {
            runtime,
            settings,
            ports,
            containers: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    fn url(&self, port: u16) -> String {
        format!("http://{}:{}", self.settings.public_host, port)
    }

    fn container_name_of(&self, job_id: &str) -> Result<String> {
        self.containers
            .read()
            .get(job_id)
            .map(|info| info.name.clone())
            .ok_or_else(|| Error::NotFound(format!("No container for job {}", job_id)))
    }

    fn spec_for(&self, job_id: &str, workspace: &Path, ports: SandboxPorts) -> ContainerSpec {
        let host = ports;
        let inner = self.settings.container_ports;
        ContainerSpec {
            name: self.settings.container_name(job_id),
            image: self.settings.image.clone(),
            workspace: workspace.to_path_buf(),
            mount_path: self.settings.mount_path.clone(),
            ports: vec![
                PortBinding { host: host.vnc, container: inner.vnc },
                PortBinding { host: host.novnc, container: inner.novnc },
                PortBinding { host: host.jupyter, container: inner.jupyter },
                PortBinding { host: host.dev, container: inner.dev },
            ],
            cap_add: self.settings.cap_add.clone(),
            security_opt: self.settings.security_opt.clone(),
            env: vec![format!("AGENTBOX_JOB_ID={}", job_id)],
            labels: HashMap::from([("agentbox.job".to_string(), job_id.to_string())]),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create (or return) the sandbox for `job_id` with `workspace` bind-mounted
    pub async fn create_container(
        self: &Arc<Self>,
        job_id: &str,
        workspace: &Path,
    ) -> Result<ContainerInfo> {
        let _guard = self.locks.lock(job_id).await;

        let existing = self.containers.read().get(job_id).cloned();
        if let Some(info) = existing {
            if info.status.is_live() {
                debug!("Reusing container {} for job {}", info.name, job_id);
                return Ok(info);
            }
            info!("Replacing {} container for job {}", info.status, job_id);
            self.teardown(job_id, &info).await?;
        }

        let workspace = tokio::fs::canonicalize(workspace).await.map_err(|e| {
            Error::NotFound(format!("Workspace {}: {}", workspace.display(), e))
        })?;

        let ports = self.ports.allocate(job_id)?;
        let spec = self.spec_for(job_id, &workspace, ports);

        let container_id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.ports.release(job_id);
                warn!("Failed to create container for job {}: {}", job_id, e);
                return Err(match e {
                    Error::Container(_) => e,
                    other => Error::Container(other.to_string()),
                });
            }
        };

        let info = ContainerInfo {
            container_id: container_id.clone(),
            name: spec.name.clone(),
            status: ContainerStatus::Starting,
            ports,
            vnc_url: self.url(ports.novnc),
            jupyter_url: self.url(ports.jupyter),
            dev_url: self.url(ports.dev),
            logs: vec![format!("Container {} created", container_id)],
            created_at: Utc::now(),
        };
        self.containers
            .write()
            .insert(job_id.to_string(), info.clone());
        info!("Container {} created for job {}", spec.name, job_id);

        let this = Arc::clone(self);
        let job = job_id.to_string();
        let delay = self.settings.status_poll_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.refresh_status(&job).await {
                debug!("Status check for job {} skipped: {}", job, e);
            }
        });

        Ok(info)
    }

    /// Resolve a `starting` container to `running` or `error`
    pub async fn refresh_status(&self, job_id: &str) -> Result<ContainerStatus> {
        let _guard = self.locks.lock(job_id).await;

        let name = {
            let containers = self.containers.read();
            let info = containers
                .get(job_id)
                .ok_or_else(|| Error::NotFound(format!("No container for job {}", job_id)))?;
            if info.status != ContainerStatus::Starting {
                return Ok(info.status);
            }
            info.name.clone()
        };

        let running = self.runtime.is_running(&name).await;

        let mut containers = self.containers.write();
        let info = containers
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("No container for job {}", job_id)))?;
        match running {
            Ok(true) => {
                info.status = ContainerStatus::Running;
                info.logs.push("Container is running and ready".to_string());
            }
            Ok(false) => {
                info.status = ContainerStatus::Error;
                info.logs.push("Container failed to start".to_string());
            }
            Err(e) => {
                info.status = ContainerStatus::Error;
                info.logs.push(format!("Container status check failed: {}", e));
            }
        }
        debug!("Container {} is {}", name, info.status);
        Ok(info.status)
    }

    /// Stop and remove the job's container, then forget it
    pub async fn stop_container(&self, job_id: &str) -> Result<ContainerInfo> {
        let _guard = self.locks.lock(job_id).await;

        let mut info = self
            .containers
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No container for job {}", job_id)))?;

        self.teardown(job_id, &info).await?;

        info.status = ContainerStatus::Stopped;
        info.logs.push("Container stopped".to_string());
        info!("Container {} stopped", info.name);
        Ok(info)
    }

    /// Stop + force remove; the record and ports go only once the object is gone.
    /// Caller holds the job lock.
    async fn teardown(&self, job_id: &str, info: &ContainerInfo) -> Result<()> {
        match self.runtime.stop(&info.name).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => warn!("Graceful stop of {} failed, forcing removal: {}", info.name, e),
        }
        match self.runtime.remove(&info.name).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => {
                if let Some(tracked) = self.containers.write().get_mut(job_id) {
                    tracked.status = ContainerStatus::Error;
                    tracked.logs.push(format!("Failed to remove container: {}", e));
                }
                return Err(e);
            }
        }
        self.containers.write().remove(job_id);
        self.ports.release(job_id);
        Ok(())
    }

    // ========================================================================
    // Proxies
    // ========================================================================

    /// Run `command` inside the job's container
    pub async fn execute_in_container(&self, job_id: &str, command: &str) -> Result<ExecOutput> {
        let name = self.container_name_of(job_id)?;
        self.runtime.exec(&name, command).await
    }

    pub async fn copy_file_to_container(
        &self,
        job_id: &str,
        host_path: &Path,
        container_path: &str,
    ) -> Result<()> {
        let name = self.container_name_of(job_id)?;
        self.runtime.copy_in(&name, host_path, container_path).await
    }

    pub async fn copy_file_from_container(
        &self,
        job_id: &str,
        container_path: &str,
        host_path: &Path,
    ) -> Result<()> {
        let name = self.container_name_of(job_id)?;
        self.runtime.copy_out(&name, container_path, host_path).await
    }

    pub async fn container_logs(&self, job_id: &str, tail: Option<usize>) -> Result<String> {
        let name = self.container_name_of(job_id)?;
        self.runtime.logs(&name, tail).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_container_info(&self, job_id: &str) -> Option<ContainerInfo> {
        self.containers.read().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<ContainerStatus> {
        self.containers.read().get(job_id).map(|info| info.status)
    }

    /// Containers tracked by this manager, keyed by job id
    pub fn tracked(&self) -> Vec<(String, ContainerInfo)> {
        let mut list: Vec<(String, ContainerInfo)> = self
            .containers
            .read()
            .iter()
            .map(|(job, info)| (job.clone(), info.clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Job ids of sandbox containers the runtime reports as running
    pub async fn list_running_containers(&self) -> Result<Vec<String>> {
        let prefix = &self.settings.name_prefix;
        let mut running = Vec::new();
        for name in self.runtime.list_by_prefix(prefix).await? {
            match self.runtime.is_running(&name).await {
                Ok(true) => running.push(name.trim_start_matches(prefix.as_str()).to_string()),
                Ok(false) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(running)
    }

    /// Stop and remove every sandbox container, tracked or left over
    pub async fn cleanup_all_containers(&self) -> CleanupReport {
        let prefix = self.settings.name_prefix.clone();
        let mut report = CleanupReport::default();

        let mut names: BTreeSet<String> = self
            .containers
            .read()
            .values()
            .map(|info| info.name.clone())
            .collect();
        match self.runtime.list_by_prefix(&prefix).await {
            Ok(listed) => names.extend(listed),
            Err(e) => {
                warn!("Failed to list containers during cleanup: {}", e);
                report.failures.push(CleanupFailure {
                    container: format!("{}*", prefix),
                    error: e.to_string(),
                });
            }
        }

        for name in names {
            let job_id = name.trim_start_matches(prefix.as_str()).to_string();
            let _guard = self.locks.lock(&job_id).await;

            let _ = self.runtime.stop(&name).await;
            match self.runtime.remove(&name).await {
                Ok(()) | Err(Error::NotFound(_)) => {
                    self.containers.write().remove(&job_id);
                    self.ports.release(&job_id);
                    report.removed.push(name);
                }
                Err(e) => {
                    warn!("Failed to remove container {}: {}", name, e);
                    report.failures.push(CleanupFailure {
                        container: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Container cleanup: {} removed, {} failed",
            report.removed.len(),
            report.failures.len()
        );
        report
    }
}
