//! Agent Orchestrator - 작업 하나를 처음부터 패키징까지 진행
//!
//! 워크스페이스 준비 → 생성기 호출 → 파일 기록 → 컨텍스트 기록 → 패키징.
//! 완료된 작업에는 대화형 명령어, 프리뷰 서버, 샌드박스를 붙일 수 있다.

use crate::generator::{GeneratedProject, ProjectGenerator};
use crate::session::{CommandExecution, SessionRegistry, TerminalSession};
use agentbox_core::{
    file_tree, package_directory, ConfinedFilesystem, ContextEntry, ContextManager, FileNode,
};
use agentbox_foundation::{AgentboxConfig, Error, Result};
use agentbox_task::{
    CommandExecutor, CommandRequest, ContainerInfo, ContainerStatus, LogEntry, LogSink,
    SandboxManager,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// 샌드박스 안에서 프리뷰 서버를 끄는 명령어
const SANDBOX_PREVIEW_KILL: &str = r#"pkill -f "npm run dev" || pkill -f "next dev" || true"#;

/// Shared collaborators handed to every orchestrator
#[derive(Clone)]
pub struct AgentServices {
    pub config: Arc<AgentboxConfig>,
    pub generator: Arc<dyn ProjectGenerator>,
    pub executor: Arc<CommandExecutor>,
    pub sandbox: Arc<SandboxManager>,
}

impl AgentServices {
    pub fn new(
        config: AgentboxConfig,
        generator: Arc<dyn ProjectGenerator>,
        sandbox: Arc<SandboxManager>,
    ) -> Self {
        let executor = Arc::new(CommandExecutor::new(config.executor.default_timeout()));
        Self {
            config: Arc::new(config),
            generator,
            executor,
            sandbox,
        }
    }
}

/// Per-job driver
pub struct AgentOrchestrator {
    job_id: String,
    workspace: PathBuf,
    fs: ConfinedFilesystem,
    context: OnceCell<Mutex<ContextManager>>,
    sessions: SessionRegistry,
    services: AgentServices,
    sink: Arc<dyn LogSink>,
    /// 로컬 프리뷰 서버 PID
    preview_pid: parking_lot::Mutex<Option<u32>>,
}

impl AgentOrchestrator {
    pub fn new(job_id: impl Into<String>, services: AgentServices, sink: Arc<dyn LogSink>) -> Self {
        let job_id = job_id.into();
        let workspace = services.config.workspace.job_dir(&job_id);
        Self {
            fs: ConfinedFilesystem::new(&workspace),
            workspace,
            job_id,
            context: OnceCell::new(),
            sessions: SessionRegistry::new(),
            services,
            sink,
            preview_pid: parking_lot::Mutex::new(None),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn filesystem(&self) -> &ConfinedFilesystem {
        &self.fs
    }

    /// Create the workspace directory
    pub async fn prepare_workspace(&self) -> Result<()> {
        self.fs.ensure_root().await?;
        debug!("Workspace ready at {}", self.workspace.display());
        Ok(())
    }

    async fn context(&self) -> Result<&Mutex<ContextManager>> {
        self.context
            .get_or_try_init(|| async {
                self.fs.ensure_root().await?;
                let mut manager =
                    ContextManager::new(self.fs.clone(), &self.services.config.context);
                manager.initialize().await?;
                Ok::<_, Error>(Mutex::new(manager))
            })
            .await
    }

    async fn record(&self, entry: ContextEntry) -> Result<()> {
        self.context().await?.lock().await.add_entry(entry).await
    }

    /// Entries relevant to `query`, most relevant first
    pub async fn relevant_context(&self, query: &str, max: usize) -> Result<Vec<ContextEntry>> {
        Ok(self
            .context()
            .await?
            .lock()
            .await
            .get_relevant_context(query, max))
    }

    // ========================================================================
    // Task
    // ========================================================================

    /// Generate the project for `description` into the workspace
    pub async fn execute_task(&self, description: &str) -> Result<GeneratedProject> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::Validation("Task description is required".to_string()));
        }

        self.prepare_workspace().await?;
        self.record(ContextEntry::task(format!("Starting task: {}", description)))
            .await?;

        match self.materialize(description).await {
            Ok(project) => {
                self.record(ContextEntry::task("Task completed successfully"))
                    .await?;
                info!(
                    "Job {}: generated {} files",
                    self.job_id,
                    project.files.len()
                );
                Ok(project)
            }
            Err(e) => {
                if let Err(ctx_err) = self
                    .record(ContextEntry::task(format!("Task failed: {}", e)))
                    .await
                {
                    warn!("Job {}: failed to record failure: {}", self.job_id, ctx_err);
                }
                Err(e)
            }
        }
    }

    async fn materialize(&self, description: &str) -> Result<GeneratedProject> {
        let generator = &self.services.generator;
        debug!("Job {}: using {} generator", self.job_id, generator.name());

        let project = generator.generate(description).await.map_err(|e| match e {
            Error::Generation(_) => e,
            other => Error::Generation(other.to_string()),
        })?;

        for (path, content) in &project.files {
            self.fs.create(path, content).await?;
            self.record(
                ContextEntry::file_change(format!("Created file: {}", path))
                    .with_metadata("path", path.as_str())?,
            )
            .await?;
            self.sink
                .log(LogEntry::info(format!("Created file: {}", path)))
                .await;
        }

        if !self.fs.exists("package.json").await? {
            self.fs
                .create("package.json", default_package_json(description)?)
                .await?;
            self.record(ContextEntry::file_change("Created file: package.json"))
                .await?;
        }

        self.fs
            .write("README.md", render_readme(description, &project))
            .await?;
        Ok(project)
    }

    /// Archive the workspace into `<downloads>/<job_id>.tar.gz`
    pub async fn package_project(&self) -> Result<PathBuf> {
        package_directory(
            &self.workspace,
            &self.services.config.workspace.downloads_dir,
            &self.job_id,
        )
        .await
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub async fn get_file_tree(&self) -> Result<Vec<FileNode>> {
        file_tree(&self.workspace).await
    }

    pub async fn get_file_content(&self, path: &str) -> Result<String> {
        self.fs.read(path).await
    }

    /// Overwrite a file, record it, and re-package
    pub async fn update_file_content(&self, path: &str, content: &str) -> Result<PathBuf> {
        self.fs.write(path, content).await?;
        self.record(
            ContextEntry::file_change(format!("Updated file: {}", path))
                .with_metadata("path", path)?,
        )
        .await?;
        self.package_project().await
    }

    // ========================================================================
    // Interactive commands
    // ========================================================================

    /// Run `command` in the sandbox when it is running, otherwise locally.
    ///
    /// Failures become an execution with exit code 1 and the error as output.
    pub async fn execute_interactive_command(
        &self,
        command: &str,
        session_id: Option<&str>,
    ) -> Result<CommandExecution> {
        let session_id = self.sessions.resolve(session_id)?;
        let started = Instant::now();

        let execution = match self.run_command(command).await {
            Ok((output, exit_code)) => {
                CommandExecution::new(command, output, exit_code, started.elapsed())
            }
            Err(e) => {
                debug!("Job {}: command failed: {}", self.job_id, e);
                CommandExecution::new(command, e.to_string(), 1, started.elapsed())
            }
        };

        self.sessions.record(&session_id, execution.clone())?;
        Ok(execution)
    }

    fn sandbox_running(&self) -> bool {
        self.services.sandbox.status(&self.job_id) == Some(ContainerStatus::Running)
    }

    async fn run_command(&self, command: &str) -> Result<(String, i64)> {
        // 샌드박스는 워크스페이스를 쓰기 가능으로 마운트하므로 같은 정책을 적용한다
        self.services.executor.policy().check(command)?;

        if self.sandbox_running() {
            let out = self
                .services
                .sandbox
                .execute_in_container(&self.job_id, command)
                .await?;
            return Ok((out.output, out.exit_code));
        }

        let output = self
            .services
            .executor
            .run(CommandRequest::new(command, &self.workspace))
            .await?;
        Ok((output.combined(), i64::from(output.exit_code)))
    }

    pub fn terminal_sessions(&self) -> Vec<TerminalSession> {
        self.sessions.list()
    }

    pub fn create_terminal_session(&self) -> TerminalSession {
        self.sessions.create()
    }

    pub fn close_terminal_session(&self, id: &str) -> Result<TerminalSession> {
        self.sessions.close(id)
    }

    // ========================================================================
    // Preview
    // ========================================================================

    /// Install dependencies and start the dev server. Returns its URL.
    pub async fn start_preview_server(&self) -> Result<String> {
        if self.sandbox_running() {
            return self.start_sandbox_preview().await;
        }

        let manifest = match self.fs.read("package.json").await {
            Ok(raw) => Some(serde_json::from_str::<Value>(&raw).map_err(|e| {
                Error::Validation(format!("Invalid package.json: {}", e))
            })?),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let start_command = preview_command(manifest.as_ref());

        // 이전 프리뷰가 남아 있으면 먼저 정리
        self.kill_local_preview();

        let settings = &self.services.config.executor;
        let executor = &self.services.executor;
        executor
            .run(CommandRequest::new("npm install", &self.workspace).timeout(settings.install_timeout()))
            .await?
            .into_result()
            .map_err(|e| Error::Execution(format!("Failed to install dependencies: {}", e)))?;

        let pid = executor
            .spawn(
                CommandRequest::new(start_command, &self.workspace)
                    .background()
                    .env("PORT", settings.preview_port.to_string()),
            )
            .await?;
        *self.preview_pid.lock() = Some(pid);

        info!("Job {}: preview '{}' started (pid {})", self.job_id, start_command, pid);
        Ok(format!("http://localhost:{}", settings.preview_port))
    }

    async fn start_sandbox_preview(&self) -> Result<String> {
        let sandbox = &self.services.sandbox;
        let info = sandbox
            .get_container_info(&self.job_id)
            .ok_or_else(|| Error::NotFound(format!("No container for job {}", self.job_id)))?;
        let mount = shlex::try_quote(&sandbox.settings().mount_path)
            .map_err(|e| Error::Validation(format!("Invalid mount path: {}", e)))?;

        let install = sandbox
            .execute_in_container(&self.job_id, &format!("cd {} && npm install", mount))
            .await?;
        if install.exit_code != 0 {
            return Err(Error::Execution(format!(
                "Failed to install dependencies (exit {}): {}",
                install.exit_code, install.output
            )));
        }
        sandbox
            .execute_in_container(
                &self.job_id,
                &format!("cd {} && nohup npm run dev > /tmp/preview.log 2>&1 &", mount),
            )
            .await?;
        Ok(info.dev_url)
    }

    fn kill_local_preview(&self) {
        if let Some(pid) = self.preview_pid.lock().take() {
            if let Err(e) = self.services.executor.kill(pid) {
                debug!("Preview process {} already gone: {}", pid, e);
            }
        }
    }

    /// Best effort
    pub async fn stop_preview_server(&self) {
        if self.sandbox_running() {
            if let Err(e) = self
                .services
                .sandbox
                .execute_in_container(&self.job_id, SANDBOX_PREVIEW_KILL)
                .await
            {
                warn!("Job {}: failed to stop sandbox preview: {}", self.job_id, e);
            }
        }
        self.kill_local_preview();
    }

    pub fn preview_pid(&self) -> Option<u32> {
        *self.preview_pid.lock()
    }

    // ========================================================================
    // Sandbox
    // ========================================================================

    pub async fn start_sandbox(&self) -> Result<ContainerInfo> {
        self.prepare_workspace().await?;
        self.services
            .sandbox
            .create_container(&self.job_id, &self.workspace)
            .await
    }

    pub async fn stop_sandbox(&self) -> Result<ContainerInfo> {
        self.services.sandbox.stop_container(&self.job_id).await
    }

    pub fn sandbox_status(&self) -> Option<ContainerInfo> {
        self.services.sandbox.get_container_info(&self.job_id)
    }

    /// web-VNC URL while the sandbox is running
    pub fn vnc_url(&self) -> Option<String> {
        self.sandbox_status()
            .filter(|info| info.status == ContainerStatus::Running)
            .map(|info| info.vnc_url)
    }

    pub fn jupyter_url(&self) -> Option<String> {
        self.sandbox_status()
            .filter(|info| info.status == ContainerStatus::Running)
            .map(|info| info.jupyter_url)
    }
}

/// `npm run dev` → `npm start` → `npx next dev`
pub fn preview_command(manifest: Option<&Value>) -> &'static str {
    let scripts = manifest.and_then(|m| m.get("scripts"));
    let has = |name: &str| scripts.and_then(|s| s.get(name)).is_some();
    if has("dev") {
        "npm run dev"
    } else if has("start") {
        "npm start"
    } else {
        "npx next dev"
    }
}

fn default_package_json(description: &str) -> Result<String> {
    let manifest = json!({
        "name": format!("generated-project-{}", Utc::now().timestamp_millis()),
        "version": "1.0.0",
        "description": format!("Project generated from: {}", description),
        "main": "index.js",
        "scripts": {
            "dev": "next dev",
            "build": "next build",
            "start": "next start",
            "lint": "next lint"
        },
        "dependencies": {
            "next": "^14.0.0",
            "react": "^18.0.0",
            "react-dom": "^18.0.0",
            "tailwindcss": "^3.0.0"
        },
        "devDependencies": {
            "@types/node": "^20.0.0",
            "@types/react": "^18.0.0",
            "@types/react-dom": "^18.0.0",
            "typescript": "^5.0.0"
        }
    });
    Ok(serde_json::to_string_pretty(&manifest)?)
}

fn render_readme(description: &str, project: &GeneratedProject) -> String {
    let files = project
        .file_paths()
        .map(|p| format!("- {}", p))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "# Generated Project\n\n\
         ## Task Description\n{description}\n\n\
         ## Summary\n{summary}\n\n\
         ## Generated Files\n{files}\n\n\
         ## Setup Instructions\n\
         1. Install dependencies: `npm install`\n\
         2. Run development server: `npm run dev`\n\
         3. Open [http://localhost:3000](http://localhost:3000) in your browser\n\n\
         Generated at: {generated_at}\n",
        description = description,
        summary = project.summary,
        files = files,
        generated_at = Utc::now().to_rfc3339(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::TemplateGenerator;
    use agentbox_core::ContextEntryKind;
    use agentbox_task::{FakeRuntime, MemoryLogSink};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct EscapingGenerator;

    #[async_trait]
    impl ProjectGenerator for EscapingGenerator {
        fn name(&self) -> &'static str {
            "escaping"
        }

        async fn generate(&self, _description: &str) -> Result<GeneratedProject> {
            Ok(GeneratedProject {
                files: BTreeMap::from([("../outside.txt".to_string(), "x".to_string())]),
                summary: String::new(),
            })
        }
    }

    fn services(root: &Path, generator: Arc<dyn ProjectGenerator>) -> (AgentServices, Arc<FakeRuntime>) {
        let mut config = AgentboxConfig::new().with_workspace_root(root);
        config.sandbox.status_poll_delay_ms = 0;
        let runtime = Arc::new(FakeRuntime::new());
        let sandbox = Arc::new(SandboxManager::new(runtime.clone(), config.sandbox.clone()));
        (AgentServices::new(config, generator, sandbox), runtime)
    }

    fn orchestrator(root: &Path) -> (AgentOrchestrator, Arc<MemoryLogSink>, Arc<FakeRuntime>) {
        let (services, runtime) = services(root, Arc::new(TemplateGenerator::new()));
        let sink = Arc::new(MemoryLogSink::new());
        (AgentOrchestrator::new("job_test", services, sink.clone()), sink, runtime)
    }

    #[tokio::test]
    async fn test_execute_task_writes_files_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, sink, _) = orchestrator(dir.path());

        let project = orch.execute_task("Build a counter").await.unwrap();
        for path in project.file_paths() {
            assert!(orch.workspace().join(path).exists(), "{}", path);
        }
        assert!(orch.workspace().join("package.json").exists());
        let readme = orch.get_file_content("README.md").await.unwrap();
        assert!(readme.contains("Build a counter"));
        assert!(readme.contains("- app/page.tsx"));

        let entries = orch.relevant_context("", 100).await.unwrap();
        let file_changes = entries
            .iter()
            .filter(|e| e.kind() == ContextEntryKind::FileChange)
            .count();
        assert_eq!(file_changes, project.files.len() + 1);
        assert!(entries.iter().any(|e| e.content() == "Task completed successfully"));
        assert!(sink.messages().contains(&"Created file: app/page.tsx".to_string()));
    }

    #[tokio::test]
    async fn test_generator_escape_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let (services, _) = services(dir.path(), Arc::new(EscapingGenerator));
        let orch = AgentOrchestrator::new("job_bad", services, Arc::new(MemoryLogSink::new()));

        let err = orch.execute_task("anything").await.unwrap_err();
        assert!(matches!(err, Error::Security(_)));
        assert!(!dir.path().join("outside.txt").exists());

        let entries = orch.relevant_context("failed", 1).await.unwrap();
        assert!(entries[0].content().starts_with("Task failed:"));
    }

    #[tokio::test]
    async fn test_empty_task_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _, _) = orchestrator(dir.path());
        assert!(matches!(orch.execute_task("   ").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_local_command_and_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _, _) = orchestrator(dir.path());
        orch.prepare_workspace().await.unwrap();

        let first = orch.execute_interactive_command("echo hi", None).await.unwrap();
        assert_eq!(first.output, "hi\n");
        assert_eq!(first.exit_code, 0);

        let sessions = orch.terminal_sessions();
        assert_eq!(sessions.len(), 1);
        let id = sessions[0].id.clone();

        let blocked = orch
            .execute_interactive_command("rm -rf /", Some(&id))
            .await
            .unwrap();
        assert_eq!(blocked.exit_code, 1);
        assert_eq!(orch.terminal_sessions()[0].commands.len(), 2);

        assert!(matches!(
            orch.execute_interactive_command("ls", Some("nope")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_commands_route_to_running_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _, runtime) = orchestrator(dir.path());

        orch.start_sandbox().await.unwrap();
        orch.services.sandbox.refresh_status("job_test").await.unwrap();
        assert!(orch.vnc_url().is_some());

        let exec = orch.execute_interactive_command("echo boxed", None).await.unwrap();
        assert_eq!(exec.output, "boxed\n");
        assert_eq!(runtime.exec_log("sandbox-job_test"), vec!["echo boxed".to_string()]);

        let url = orch.start_preview_server().await.unwrap();
        assert_eq!(url, orch.sandbox_status().unwrap().dev_url);
        orch.stop_preview_server().await;
        assert!(runtime
            .exec_log("sandbox-job_test")
            .iter()
            .any(|c| c.contains("pkill")));

        orch.stop_sandbox().await.unwrap();
        assert!(orch.sandbox_status().is_none());
        assert!(orch.vnc_url().is_none());
    }

    #[tokio::test]
    async fn test_denied_command_never_reaches_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _, runtime) = orchestrator(dir.path());

        orch.start_sandbox().await.unwrap();
        orch.services.sandbox.refresh_status("job_test").await.unwrap();

        let blocked = orch.execute_interactive_command("rm -rf /", None).await.unwrap();
        assert_eq!(blocked.exit_code, 1);
        assert!(blocked.output.starts_with("Security violation"), "{}", blocked.output);
        assert!(runtime.exec_log("sandbox-job_test").is_empty());
    }

    #[tokio::test]
    async fn test_update_file_repackages() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _, _) = orchestrator(dir.path());
        orch.execute_task("Build a counter").await.unwrap();

        let archive = orch.update_file_content("app/page.tsx", "changed").await.unwrap();
        assert!(archive.ends_with("job_test.tar.gz"));
        assert_eq!(orch.get_file_content("app/page.tsx").await.unwrap(), "changed");
        assert!(matches!(
            orch.update_file_content("../x", "y").await,
            Err(Error::Security(_))
        ));
    }

    #[test]
    fn test_preview_command_selection() {
        assert_eq!(preview_command(Some(&json!({"scripts": {"dev": "next dev"}}))), "npm run dev");
        assert_eq!(preview_command(Some(&json!({"scripts": {"start": "node ."}}))), "npm start");
        assert_eq!(preview_command(Some(&json!({}))), "npx next dev");
        assert_eq!(preview_command(None), "npx next dev");
    }
}
