//! In-memory container runtime for tests
//!
//! 컨테이너 생성/실행을 기록만 한다. `echo ...`는 그대로 출력하고 `exit N`은 종료 코드 N을 돌려준다.

use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput};
use agentbox_foundation::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    spec: Option<ContainerSpec>,
    running: bool,
    files: HashMap<String, Vec<u8>>,
    execs: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    created: usize,
    fail_next_create: bool,
    start_stopped: bool,
    fail_remove: Vec<String>,
}

/// Records every call, no processes involved
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next `create` fails with `Error::Container`
    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    /// Containers created from now on report not running
    pub fn start_stopped(&self, stopped: bool) {
        self.state.lock().start_stopped = stopped;
    }

    /// `remove` of this container fails with `Error::Container`
    pub fn fail_remove(&self, name: &str) {
        self.state.lock().fail_remove.push(name.to_string());
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.running = running;
        }
    }

    /// A container this process did not create (left over from an earlier run)
    pub fn insert_orphan(&self, name: &str) {
        self.state.lock().containers.insert(
            name.to_string(),
            FakeContainer {
                id: format!("orphan-{}", name),
                spec: None,
                running: true,
                files: HashMap::new(),
                execs: Vec::new(),
            },
        );
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().created
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().containers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .containers
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    pub fn exec_log(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(name)
            .map(|c| c.execs.clone())
            .unwrap_or_default()
    }

    pub fn file(&self, name: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .containers
            .get(name)
            .and_then(|c| c.files.get(path).cloned())
    }

    fn with_container<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("Container {}", name)))?;
        Ok(f(container))
    }
}

fn respond(command: &str) -> ExecOutput {
    let trimmed = command.trim();
    if let Some(rest) = trimmed.strip_prefix("echo ") {
        return ExecOutput {
            output: format!("{}\n", rest),
            exit_code: 0,
        };
    }
    if let Some(code) = trimmed.strip_prefix("exit ") {
        return ExecOutput {
            output: String::new(),
            exit_code: code.trim().parse().unwrap_or(1),
        };
    }
    ExecOutput {
        output: String::new(),
        exit_code: 0,
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_create) {
            return Err(Error::Container(format!("Failed to create {}", spec.name)));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(Error::Container(format!("Conflict: {} already exists", spec.name)));
        }
        state.created += 1;
        let id = format!("fake-{:04}", state.created);
        let running = !state.start_stopped;
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec: Some(spec.clone()),
                running,
                files: HashMap::new(),
                execs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn is_running(&self, container: &str) -> Result<bool> {
        self.with_container(container, |c| c.running)
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.with_container(container, |c| c.running = false)
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_remove.iter().any(|n| n == container) {
            return Err(Error::Container(format!("Failed to remove {}", container)));
        }
        state
            .containers
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Container {}", container)))
    }

    async fn exec(&self, container: &str, command: &str) -> Result<ExecOutput> {
        self.with_container(container, |c| {
            c.execs.push(command.to_string());
            respond(command)
        })
    }

    async fn copy_in(&self, container: &str, host_path: &Path, container_path: &str) -> Result<()> {
        let data = tokio::fs::read(host_path).await?;
        self.with_container(container, |c| {
            c.files.insert(container_path.to_string(), data);
        })
    }

    async fn copy_out(&self, container: &str, container_path: &str, host_path: &Path) -> Result<()> {
        let data = self
            .with_container(container, |c| c.files.get(container_path).cloned())?
            .ok_or_else(|| Error::NotFound(format!("{}:{}", container, container_path)))?;
        tokio::fs::write(host_path, data).await?;
        Ok(())
    }

    async fn logs(&self, container: &str, _tail: Option<usize>) -> Result<String> {
        self.with_container(container, |c| format!("{} started\n", c.id))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .container_names()
            .into_iter()
            .filter(|n| n.starts_with(prefix))
            .collect())
    }
}
