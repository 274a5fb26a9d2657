//! Job persistence
//!
//! - `InMemoryJobRepository`: 프로세스 메모리 (서버, 테스트)
//! - `JsonJobRepository`: 작업당 JSON 파일 하나 (CLI처럼 실행 간에 남아야 할 때)

use crate::job::{Job, JobId};
use agentbox_foundation::{Error, JsonStore, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Read-your-writes store for jobs
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    async fn set(&self, job: &Job) -> Result<()>;

    /// All jobs, oldest first
    async fn list(&self) -> Result<Vec<Job>>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn set(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id().clone(), job.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at());
        Ok(jobs)
    }
}

// ============================================================================
// JSON files
// ============================================================================

#[derive(Debug, Clone)]
pub struct JsonJobRepository {
    store: JsonStore,
}

impl JsonJobRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
        }
    }

    fn file_name(id: &JobId) -> String {
        format!("{}.json", id)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(JsonStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| Error::Internal(format!("Job store task failed: {}", e)))?
    }
}

#[async_trait]
impl JobRepository for JsonJobRepository {
    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let file = Self::file_name(id);
        self.blocking(move |store| store.load_optional::<Job>(&file))
            .await
    }

    async fn set(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.blocking(move |store| store.save(&Self::file_name(job.id()), &job))
            .await
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let mut jobs = self
            .blocking(|store| {
                let mut jobs = Vec::new();
                for name in store.list()? {
                    if let Some(job) = store.load_optional::<Job>(&format!("{}.json", name))? {
                        jobs.push(job);
                    }
                }
                Ok(jobs)
            })
            .await?;
        jobs.sort_by_key(|j| j.created_at());
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogEntry;
    use crate::state::JobStatus;

    #[tokio::test]
    async fn test_in_memory_read_your_writes() {
        let repo = InMemoryJobRepository::new();
        let mut job = Job::new("task");
        repo.set(&job).await.unwrap();

        job.transition(JobStatus::Provisioning, LogEntry::info("go"))
            .unwrap();
        repo.set(&job).await.unwrap();

        let loaded = repo.get(job.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), JobStatus::Provisioning);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_repository_persists() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("persist me");
        {
            let repo = JsonJobRepository::new(dir.path());
            repo.set(&job).await.unwrap();
        }

        let repo = JsonJobRepository::new(dir.path());
        let loaded = repo.get(job.id()).await.unwrap().unwrap();
        assert_eq!(loaded.description(), "persist me");
        assert_eq!(loaded.logs().len(), 1);

        let missing = JobId::parse("job_missing").unwrap();
        assert!(repo.get(&missing).await.unwrap().is_none());
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
