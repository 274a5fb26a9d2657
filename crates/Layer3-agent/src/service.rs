//! Job Service - 작업 예약부터 대화형 조작까지의 진입점
//!
//! 작업마다 tokio 태스크 하나가 상태 기계를 진행시킨다.
//! Queued → Provisioning → Running → Completed / Failed
//!
//! 대화형 작업(명령어, 프리뷰, 샌드박스)은 Completed 상태의 작업에만 허용된다.

use crate::orchestrator::{AgentOrchestrator, AgentServices};
use crate::session::CommandExecution;
use agentbox_core::FileNode;
use agentbox_foundation::{Error, Result};
use agentbox_task::{
    CleanupReport, ContainerInfo, Job, JobEvent, JobId, JobManager, JobStatus, LogEntry,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct JobService {
    jobs: Arc<JobManager>,
    services: AgentServices,
    orchestrators: Mutex<HashMap<JobId, Arc<AgentOrchestrator>>>,
    tasks: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl JobService {
    pub fn new(jobs: Arc<JobManager>, services: AgentServices) -> Self {
        Self {
            jobs,
            services,
            orchestrators: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.jobs.subscribe()
    }

    /// Orchestrator for `id`, created on first use
    pub fn orchestrator(&self, id: &JobId) -> Arc<AgentOrchestrator> {
        self.orchestrators
            .lock()
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(AgentOrchestrator::new(
                    id.as_str(),
                    self.services.clone(),
                    self.jobs.sink(id),
                ))
            })
            .clone()
    }

    /// 더 이상 대화형 조작이 없는 작업(Failed/Canceled)의 orchestrator를 내려놓는다
    fn evict_orchestrator(&self, id: &JobId) {
        if self.orchestrators.lock().remove(id).is_some() {
            debug!("Released orchestrator for job {}", id);
        }
    }

    pub fn orchestrator_count(&self) -> usize {
        self.orchestrators.lock().len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the job and start processing it in the background
    pub async fn schedule(self: &Arc<Self>, task: &str) -> Result<JobId> {
        let job = self.jobs.create(task).await?;
        let id = job.id().clone();
        info!("Scheduled job {}", id);

        let this = Arc::clone(self);
        let job_id = id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = this.run_job(&job_id).await {
                debug!("Job {} ended with error: {}", job_id, e);
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(id.clone(), handle);
        Ok(id)
    }

    /// Drive one job to a terminal state
    pub async fn run_job(&self, id: &JobId) -> Result<()> {
        let job = self
            .jobs
            .transition(id, JobStatus::Provisioning, LogEntry::info("Initializing agent workspace..."))
            .await?;
        let orchestrator = self.orchestrator(id);

        if let Err(e) = orchestrator.prepare_workspace().await {
            self.fail(id, &e).await;
            return Err(e);
        }

        self.jobs
            .transition(
                id,
                JobStatus::Running,
                LogEntry::info("Agent started, analyzing task requirements..."),
            )
            .await?;

        match self.generate_and_package(id, &orchestrator, job.description()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(id, &e).await;
                Err(e)
            }
        }
    }

    async fn generate_and_package(
        &self,
        id: &JobId,
        orchestrator: &AgentOrchestrator,
        description: &str,
    ) -> Result<()> {
        self.jobs
            .append_log(id, LogEntry::info("Generating project structure..."))
            .await?;
        orchestrator.execute_task(description).await?;

        self.jobs
            .append_log(id, LogEntry::info("Project generated, packaging files..."))
            .await?;
        let archive = orchestrator.package_project().await?;
        debug!("Job {} packaged to {}", id, archive.display());

        let prefix = self.services.config.workspace.download_url_prefix.trim_end_matches('/');
        let url = format!("{}/{}", prefix, id);
        self.jobs
            .update(id, move |job| {
                job.set_download_url(url);
                Ok(())
            })
            .await?;

        self.jobs
            .transition(
                id,
                JobStatus::Completed,
                LogEntry::success("Task completed successfully! Project ready for download."),
            )
            .await?;
        info!("Job {} completed", id);
        Ok(())
    }

    async fn fail(&self, id: &JobId, cause: &Error) {
        error!("Job {} failed: {}", id, cause);
        self.evict_orchestrator(id);
        if let Err(e) = self
            .jobs
            .transition(id, JobStatus::Failed, LogEntry::error(format!("Task failed: {}", cause)))
            .await
        {
            warn!("Could not mark job {} as failed: {}", id, e);
        }
    }

    /// Cancel a non-terminal job, abort its task and stop its sandbox (best effort)
    pub async fn cancel(&self, id: &JobId) -> Result<Job> {
        let job = self
            .jobs
            .transition(id, JobStatus::Canceled, LogEntry::warn("Job canceled"))
            .await?;

        if let Some(handle) = self.tasks.lock().remove(id) {
            handle.abort();
        }

        let orchestrator = self.orchestrator(id);
        orchestrator.stop_preview_server().await;
        match orchestrator.stop_sandbox().await {
            Ok(_) | Err(Error::NotFound(_)) => {}
            Err(e) => warn!("Failed to stop sandbox for canceled job {}: {}", id, e),
        }
        self.evict_orchestrator(id);
        info!("Job {} canceled", id);
        Ok(job)
    }

    pub async fn wait_for_terminal(&self, id: &JobId, timeout: Duration) -> Result<Job> {
        self.jobs.wait_for_terminal(id, timeout).await
    }

    /// Stop every container and background process
    pub async fn shutdown(&self) -> CleanupReport {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
        let report = self.services.sandbox.cleanup_all_containers().await;
        let killed = self.services.executor.kill_all();
        info!(
            "Shutdown: removed {} containers, {} failures, killed {} processes",
            report.removed.len(),
            report.failures.len(),
            killed.len()
        );
        report
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_status(&self, id: &JobId) -> Result<Job> {
        self.jobs.get(id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.jobs.list().await
    }

    async fn require_completed(&self, id: &JobId) -> Result<Job> {
        let job = self.jobs.get(id).await?;
        if job.status() != JobStatus::Completed {
            return Err(Error::Validation("Job not completed yet".to_string()));
        }
        Ok(job)
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub async fn list_files(&self, id: &JobId) -> Result<Vec<FileNode>> {
        self.require_completed(id).await?;
        self.orchestrator(id).get_file_tree().await
    }

    pub async fn get_file(&self, id: &JobId, path: &str) -> Result<String> {
        self.jobs.get(id).await?;
        self.orchestrator(id).get_file_content(path).await
    }

    pub async fn put_file(&self, id: &JobId, path: &str, content: &str) -> Result<()> {
        self.jobs.get(id).await?;
        self.orchestrator(id).update_file_content(path, content).await?;
        self.jobs
            .append_log(id, LogEntry::info(format!("File updated: {}", path)))
            .await
    }

    // ========================================================================
    // Interactive
    // ========================================================================

    pub async fn execute_command(
        &self,
        id: &JobId,
        command: &str,
        session_id: Option<&str>,
    ) -> Result<CommandExecution> {
        self.require_completed(id).await?;
        let execution = self
            .orchestrator(id)
            .execute_interactive_command(command, session_id)
            .await?;

        self.jobs
            .append_log(id, LogEntry::command(format!("Command executed: {}", command)))
            .await?;
        if !execution.output.is_empty() {
            self.jobs
                .append_log(id, LogEntry::output(execution.output.clone()))
                .await?;
        }
        Ok(execution)
    }

    pub async fn start_preview(&self, id: &JobId) -> Result<String> {
        self.require_completed(id).await?;
        let url = self.orchestrator(id).start_preview_server().await?;

        let preview = url.clone();
        self.jobs
            .update(id, move |job| {
                job.set_preview_url(Some(preview));
                Ok(())
            })
            .await?;
        self.jobs
            .append_log(id, LogEntry::success(format!("Preview server started at {}", url)))
            .await?;
        Ok(url)
    }

    pub async fn stop_preview(&self, id: &JobId) -> Result<()> {
        self.jobs.get(id).await?;
        self.orchestrator(id).stop_preview_server().await;
        self.jobs
            .update(id, |job| {
                job.set_preview_url(None);
                Ok(())
            })
            .await?;
        self.jobs
            .append_log(id, LogEntry::info("Preview server stopped"))
            .await
    }

    pub async fn start_sandbox(&self, id: &JobId) -> Result<ContainerInfo> {
        self.require_completed(id).await?;
        let info = self.orchestrator(id).start_sandbox().await?;
        self.jobs
            .append_log(
                id,
                LogEntry::success(format!("Sandbox environment started - VNC: {}", info.vnc_url)),
            )
            .await?;
        Ok(info)
    }

    pub async fn sandbox_status(&self, id: &JobId) -> Result<ContainerInfo> {
        self.jobs.get(id).await?;
        self.orchestrator(id)
            .sandbox_status()
            .ok_or_else(|| Error::NotFound("No sandbox environment running".to_string()))
    }

    pub async fn stop_sandbox(&self, id: &JobId) -> Result<ContainerInfo> {
        self.jobs.get(id).await?;
        let info = self.orchestrator(id).stop_sandbox().await?;
        self.jobs
            .append_log(id, LogEntry::info("Sandbox environment stopped"))
            .await?;
        Ok(info)
    }
}
