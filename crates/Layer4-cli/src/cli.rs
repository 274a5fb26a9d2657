//! Subcommand implementations

use crate::Command;
use agentbox_agent::{AgentServices, JobService, TemplateGenerator};
use agentbox_core::FileNode;
use agentbox_foundation::AgentboxConfig;
use agentbox_task::{
    DockerRuntime, Job, JobEvent, JobId, JobManager, JobStatus, JsonJobRepository, LogEntry,
    SandboxManager,
};
use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// 작업 레코드 디렉토리 (워크스페이스 루트 기준)
const JOBS_DIR: &str = ".jobs";

pub struct App {
    service: Arc<JobService>,
}

impl App {
    pub fn new(config: AgentboxConfig) -> anyhow::Result<Self> {
        let repo = Arc::new(JsonJobRepository::new(config.workspace.root.join(JOBS_DIR)));
        let jobs = Arc::new(JobManager::new(repo));

        let runtime = Arc::new(DockerRuntime::new()?);
        let sandbox = Arc::new(SandboxManager::new(runtime, config.sandbox.clone()));
        tracing::debug!("Using container runtime: {}", sandbox.runtime_name());
        let services = AgentServices::new(config, Arc::new(TemplateGenerator::new()), sandbox);

        Ok(Self {
            service: Arc::new(JobService::new(jobs, services)),
        })
    }

    pub async fn dispatch(&self, command: Command, json: bool) -> anyhow::Result<()> {
        match command {
            Command::Run { task, timeout } => self.run(&task, Duration::from_secs(timeout), json).await,
            Command::Status { job_id } => {
                let job = self.service.get_status(&parse_id(&job_id)?).await?;
                print_job(&job, json, true)
            }
            Command::List => self.list().await,
            Command::Files { job_id } => {
                let tree = self.service.list_files(&parse_id(&job_id)?).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&tree)?);
                } else {
                    print_tree(&tree, 0);
                }
                Ok(())
            }
            Command::Cat { job_id, path } => {
                let content = self.service.get_file(&parse_id(&job_id)?, &path).await?;
                print!("{}", content);
                Ok(())
            }
            Command::Exec { job_id, command } => self.exec(&parse_id(&job_id)?, &command.join(" ")).await,
            Command::Cleanup => {
                let report = self.service.shutdown().await;
                for name in &report.removed {
                    println!("✓ removed {}", name);
                }
                for failure in &report.failures {
                    eprintln!("✗ {}: {}", failure.container, failure.error);
                }
                if !report.is_clean() {
                    bail!("{} containers could not be removed", report.failures.len());
                }
                Ok(())
            }
        }
    }

    async fn run(&self, task: &str, timeout: Duration, json: bool) -> anyhow::Result<()> {
        let mut events = self.service.subscribe();
        let id = self.service.schedule(task).await?;
        println!("Scheduled {}\n", id);

        // 종료될 때까지 로그를 흘려보낸다
        let follower = {
            let id = id.clone();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(JobEvent::Log { job_id, entry }) if job_id == id => print_log(&entry),
                        Ok(JobEvent::StatusChanged { job_id, status }) if job_id == id && status.is_terminal() => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => eprintln!("... {} log lines skipped", n),
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        };

        let waited = tokio::select! {
            job = self.service.wait_for_terminal(&id, timeout) => job,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nInterrupted, canceling {}", id);
                self.service.cancel(&id).await
            }
        };
        // 마지막 로그 줄까지 출력되도록 잠깐 기다린다
        let _ = tokio::time::timeout(Duration::from_millis(200), follower).await;

        let job = waited.with_context(|| format!("Job {} did not finish", id))?;
        println!();
        print_job(&job, json, false)?;
        if job.status() != JobStatus::Completed {
            bail!("Job {} ended as {}", id, job.status());
        }
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<()> {
        let jobs = self.service.list_jobs().await?;
        if jobs.is_empty() {
            println!("No jobs found.");
            return Ok(());
        }

        println!("{:<44} {:<14} {:<22} Description", "ID", "Status", "Created");
        println!("{}", "-".repeat(100));
        for job in jobs {
            println!(
                "{:<44} {:<14} {:<22} {}",
                job.id(),
                format!("{} {}", job.status().symbol(), job.status()),
                job.created_at().format("%Y-%m-%d %H:%M:%S"),
                truncate(job.description(), 40)
            );
        }
        Ok(())
    }

    async fn exec(&self, id: &JobId, command: &str) -> anyhow::Result<()> {
        let execution = self.service.execute_command(id, command, None).await?;
        print!("{}", execution.output);
        if !execution.success() {
            bail!("exit code {} ({} ms)", execution.exit_code, execution.duration);
        }
        Ok(())
    }
}

fn parse_id(raw: &str) -> anyhow::Result<JobId> {
    Ok(JobId::parse(raw)?)
}

fn print_log(entry: &LogEntry) {
    println!(
        "{} [{:<7}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.kind.as_str(),
        entry.message.trim_end()
    );
}

fn print_job(job: &Job, json: bool, with_logs: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }

    println!("{} {} ({})", job.status().symbol(), job.id(), job.status().display_name());
    println!("  {}", job.description());
    if let Some(url) = job.download_url() {
        println!("  download: {}", url);
    }
    if let Some(url) = job.preview_url() {
        println!("  preview:  {}", url);
    }
    if with_logs {
        println!();
        for entry in job.logs() {
            print_log(entry);
        }
    }
    Ok(())
}

fn print_tree(nodes: &[FileNode], depth: usize) {
    for node in nodes {
        let suffix = if node.is_dir() { "/" } else { "" };
        println!("{}{}{}", "  ".repeat(depth), node.name, suffix);
        if let Some(children) = &node.children {
            print_tree(children, depth + 1);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long description", 10), "a long ...");
    }

    #[test]
    fn test_parse_id_rejects_paths() {
        assert!(parse_id("job_123").is_ok());
        assert!(parse_id("../job").is_err());
    }
}
