//! Job Manager - the shared job table
//!
//! Features:
//! - 작업별 read-modify-write 직렬화 (KeyedLocks), 전역 락 없음
//! - 상태 전이 검증 및 로그 기록
//! - 변경 이벤트 broadcast (상태 조회 쪽에서 구독)

use crate::job::{Job, JobId};
use crate::log::{LogEntry, LogSink};
use crate::repository::JobRepository;
use crate::state::JobStatus;
use agentbox_foundation::{Error, KeyedLocks, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Broadcast channel capacity
const EVENT_CAPACITY: usize = 1024;

/// Change notifications emitted after a mutation is stored
#[derive(Debug, Clone)]
pub enum JobEvent {
    Created { job_id: JobId },
    StatusChanged { job_id: JobId, status: JobStatus },
    Log { job_id: JobId, entry: LogEntry },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Created { job_id }
            | JobEvent::StatusChanged { job_id, .. }
            | JobEvent::Log { job_id, .. } => job_id,
        }
    }
}

/// Job Manager - handles job records on top of a repository
pub struct JobManager {
    repo: Arc<dyn JobRepository>,
    locks: KeyedLocks,
    events: broadcast::Sender<JobEvent>,
}

impl JobManager {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            repo,
            locks: KeyedLocks::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Create and store a queued job
    pub async fn create(&self, description: &str) -> Result<Job> {
        if description.trim().is_empty() {
            return Err(Error::Validation("Task description is required".to_string()));
        }
        let job = Job::new(description.trim());
        self.repo.set(&job).await?;
        debug!("Job {} created", job.id());
        let _ = self.events.send(JobEvent::Created {
            job_id: job.id().clone(),
        });
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Result<Job> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        self.repo.list().await
    }

    /// Apply `f` to the stored job under the job's lock and persist the result.
    /// Nothing is stored when `f` fails.
    pub async fn update<T, F>(&self, id: &JobId, f: F) -> Result<(Job, T)>
    where
        F: FnOnce(&mut Job) -> Result<T> + Send,
    {
        let _guard = self.locks.lock(id.as_str()).await;
        let mut job = self.get(id).await?;
        let out = f(&mut job)?;
        self.repo.set(&job).await?;
        Ok((job, out))
    }

    pub async fn transition(
        &self,
        id: &JobId,
        status: JobStatus,
        entry: LogEntry,
    ) -> Result<Job> {
        let logged = entry.clone();
        let (job, _) = self
            .update(id, move |job| job.transition(status, entry))
            .await?;
        debug!("Job {} -> {}", id, status);
        let _ = self.events.send(JobEvent::StatusChanged {
            job_id: id.clone(),
            status,
        });
        let _ = self.events.send(JobEvent::Log {
            job_id: id.clone(),
            entry: logged,
        });
        Ok(job)
    }

    pub async fn append_log(&self, id: &JobId, entry: LogEntry) -> Result<()> {
        let logged = entry.clone();
        self.update(id, move |job| {
            job.append_log(entry);
            Ok(())
        })
        .await?;
        let _ = self.events.send(JobEvent::Log {
            job_id: id.clone(),
            entry: logged,
        });
        Ok(())
    }

    /// Wait until the job reaches a terminal state or `timeout` elapses.
    pub async fn wait_for_terminal(&self, id: &JobId, timeout: Duration) -> Result<Job> {
        let events = self.subscribe();
        tokio::time::timeout(timeout, self.watch_until_terminal(id, events))
            .await
            .map_err(|_| Error::Execution(format!("Timed out waiting for job {}", id)))?
    }

    async fn watch_until_terminal(
        &self,
        id: &JobId,
        mut events: broadcast::Receiver<JobEvent>,
    ) -> Result<Job> {
        loop {
            // 구독 이후에 다시 읽어서 사이에 끼인 전이를 놓치지 않는다
            let job = self.get(id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            loop {
                match events.recv().await {
                    Ok(JobEvent::StatusChanged { job_id, .. }) if &job_id == id => break,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Internal("Job event channel closed".into()))
                    }
                }
            }
        }
    }

    /// Sink that appends to one job's log
    pub fn sink(self: &Arc<Self>, id: &JobId) -> Arc<dyn LogSink> {
        Arc::new(JobLogSink {
            manager: self.clone(),
            job_id: id.clone(),
        })
    }
}

struct JobLogSink {
    manager: Arc<JobManager>,
    job_id: JobId,
}

#[async_trait]
impl LogSink for JobLogSink {
    async fn log(&self, entry: LogEntry) {
        if let Err(e) = self.manager.append_log(&self.job_id, entry).await {
            warn!("Failed to append log to job {}: {}", self.job_id, e);
        }
    }
}
