//! Agentbox Config - 통합 설정
//!
//! 기본값 → 글로벌(`~/.config/agentbox/config.json`) → 프로젝트(`.agentbox/config.json`)
//! → 환경 변수 순서로 덮어쓴다. 파일에는 바꾸고 싶은 필드만 적으면 된다.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// 설정 파일명
pub const AGENTBOX_CONFIG_FILE: &str = "config.json";

/// 워크스페이스 루트를 덮어쓰는 환경 변수
pub const WORKSPACE_ROOT_ENV: &str = "AGENTBOX_WORKSPACE_ROOT";

// ============================================================================
// Agentbox Config (통합)
// ============================================================================

/// agentbox 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentboxConfig {
    pub workspace: WorkspaceSettings,
    pub executor: ExecutorSettings,
    pub context: ContextSettings,
    pub sandbox: SandboxSettings,
}

impl AgentboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    pub fn load() -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(overlay) = global.load_optional::<Value>(AGENTBOX_CONFIG_FILE)? {
                debug!("Applied global config from {}", global.base_dir().display());
                merge_values(&mut merged, overlay);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(overlay) = project.load_optional::<Value>(AGENTBOX_CONFIG_FILE)? {
                debug!("Applied project config from {}", project.base_dir().display());
                merge_values(&mut merged, overlay);
            }
        }

        let mut config: Self = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;

        // 3. 환경 변수
        if let Ok(root) = std::env::var(WORKSPACE_ROOT_ENV) {
            if !root.trim().is_empty() {
                debug!("Workspace root overridden by {}", WORKSPACE_ROOT_ENV);
                config.workspace.root = PathBuf::from(root);
            }
        }

        Ok(config)
    }

    /// 워크스페이스 루트 지정 (downloads 디렉토리도 그 아래로 이동)
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.workspace.downloads_dir = root.join("downloads");
        self.workspace.root = root;
        self
    }

    /// 프로젝트 설정 저장
    pub fn save_project(&self) -> Result<()> {
        JsonStore::current_project()?.save(AGENTBOX_CONFIG_FILE, self)
    }
}

/// `overlay`의 값을 `base`에 재귀적으로 덮어쓴다 (overlay 우선)
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

// ============================================================================
// Sections
// ============================================================================

/// 워크스페이스/다운로드 위치
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSettings {
    /// 작업별 워크스페이스가 생성되는 루트 (`<root>/<job_id>`)
    pub root: PathBuf,
    /// 패키지 아카이브 출력 디렉토리
    pub downloads_dir: PathBuf,
    /// 다운로드 URL 접두사 (`<prefix>/<job_id>`)
    pub download_url_prefix: String,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspaces"),
            downloads_dir: PathBuf::from("public/downloads"),
            download_url_prefix: "/api/download".to_string(),
        }
    }
}

impl WorkspaceSettings {
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }
}

/// 명령어 실행 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorSettings {
    pub default_timeout_secs: u64,
    /// `npm install` 같은 설치 명령어 타임아웃
    pub install_timeout_secs: u64,
    /// 로컬 프리뷰 서버 포트
    pub preview_port: u16,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            install_timeout_secs: 600,
            preview_port: 3001,
        }
    }
}

impl ExecutorSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

/// 컨텍스트 매니저 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    pub max_tokens: usize,
    pub file_name: String,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_tokens: 900_000,
            file_name: ".agent_context.json".to_string(),
        }
    }
}

/// 샌드박스 포트 묶음 (vnc, novnc, jupyter, dev)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPorts {
    pub vnc: u16,
    pub novnc: u16,
    pub jupyter: u16,
    pub dev: u16,
}

/// 컨테이너 샌드박스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxSettings {
    pub image: String,
    pub name_prefix: String,
    /// URL 생성에 쓰는 호스트 이름
    pub public_host: String,
    /// 컨테이너 안의 워크스페이스 마운트 경로
    pub mount_path: String,
    /// 호스트 포트 기준값 (오프셋을 더해서 할당)
    pub host_base_ports: SandboxPorts,
    /// 컨테이너 내부 포트
    pub container_ports: SandboxPorts,
    /// 생성 후 상태 확인까지 대기 시간
    pub status_poll_delay_ms: u64,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "sandbox-agent:latest".to_string(),
            name_prefix: "sandbox-".to_string(),
            public_host: "localhost".to_string(),
            mount_path: "/home/agent/workspace".to_string(),
            host_base_ports: SandboxPorts {
                vnc: 5900,
                novnc: 6080,
                jupyter: 8888,
                dev: 3001,
            },
            container_ports: SandboxPorts {
                vnc: 5900,
                novnc: 6080,
                jupyter: 8888,
                dev: 3000,
            },
            status_poll_delay_ms: 5000,
            cap_add: vec!["SYS_ADMIN".to_string()],
            security_opt: vec!["seccomp=unconfined".to_string()],
        }
    }
}

impl SandboxSettings {
    pub fn status_poll_delay(&self) -> Duration {
        Duration::from_millis(self.status_poll_delay_ms)
    }

    pub fn container_name(&self, job_id: &str) -> String {
        format!("{}{}", self.name_prefix, job_id)
    }
}
