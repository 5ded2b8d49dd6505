//! Persistence for cron jobs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use switchboard_core::{Result, SwitchboardError};

use crate::types::CronJob;

/// Where the job list lives.
#[async_trait]
pub trait CronStore: Send + Sync {
    async fn load_jobs(&self) -> Result<Vec<CronJob>>;
    /// Insert or replace by id.
    async fn save_job(&self, job: &CronJob) -> Result<()>;
    /// Fails with [`SwitchboardError::JobNotFound`] for unknown ids.
    async fn delete_job(&self, id: &str) -> Result<()>;
}

/// Jobs as one JSON array on disk, rewritten atomically (temp file + rename).
///
/// Entries that fail to parse are skipped with a warning; the rest still load.
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<CronJob>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw).map_err(|e| {
            SwitchboardError::Config(format!("{}: not a job list: {e}", self.path.display()))
        })?;

        let mut jobs = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<CronJob>(entry) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %self.path.display(), index, error = %e, "skipping malformed cron job"),
            }
        }
        Ok(jobs)
    }

    async fn write(&self, jobs: &[CronJob]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(jobs)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CronStore for FileStore {
    async fn load_jobs(&self) -> Result<Vec<CronJob>> {
        self.read().await
    }

    async fn save_job(&self, job: &CronJob) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut jobs = self.read().await?;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        self.write(&jobs).await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut jobs = self.read().await?;
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(SwitchboardError::JobNotFound(id.to_string()));
        }
        self.write(&jobs).await
    }
}

/// Volatile store for tests and ephemeral setups.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<Vec<CronJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<CronJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
        }
    }
}

#[async_trait]
impl CronStore for MemoryStore {
    async fn load_jobs(&self) -> Result<Vec<CronJob>> {
        Ok(self.jobs.lock().clone())
    }

    async fn save_job(&self, job: &CronJob) -> Result<()> {
        let mut jobs = self.jobs.lock();
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(SwitchboardError::JobNotFound(id.to_string()));
        }
        Ok(())
    }
}
