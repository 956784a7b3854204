use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::AppError;
use crate::job::JobRecord;

/// Volatile, process-lifetime job store.
///
/// Every read and write goes through one exclusive lock, so a job's
/// status and result/error are always observed as a consistent pair.
/// Clones share the same map; construct one per serving process (or per
/// test) and hand it to the service and the executor.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. Fails if the id is already present.
    pub async fn create(&self, record: JobRecord) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        insert(&mut jobs, record)
    }

    /// Insert a new record only while fewer than `limit` jobs are non-terminal.
    pub async fn create_within(&self, record: JobRecord, limit: usize) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        let active = jobs.values().filter(|j| !j.status.is_terminal()).count();
        if active >= limit {
            return Err(AppError::Overloaded(limit));
        }
        insert(&mut jobs, record)
    }

    /// Snapshot of a record.
    pub async fn get(&self, request_id: &str) -> Result<JobRecord, AppError> {
        self.jobs
            .lock()
            .await
            .get(request_id)
            .cloned()
            .ok_or_else(|| not_found(request_id))
    }

    /// Apply `f` to a record under the lock.
    ///
    /// `f` must be quick in-memory work; never call the engine from here.
    pub async fn mutate<T, F>(&self, request_id: &str, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut JobRecord) -> Result<T, AppError>,
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(request_id)
            .ok_or_else(|| not_found(request_id))?;
        f(job)
    }

    /// Number of queued or running jobs.
    pub async fn count_active(&self) -> usize {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|j| !j.status.is_terminal())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

fn insert(jobs: &mut HashMap<String, JobRecord>, record: JobRecord) -> Result<(), AppError> {
    if jobs.contains_key(&record.request_id) {
        return Err(AppError::Internal(format!(
            "duplicate request_id {}",
            record.request_id
        )));
    }
    jobs.insert(record.request_id.clone(), record);
    Ok(())
}

fn not_found(request_id: &str) -> AppError {
    AppError::NotFound(format!("request_id not found: {request_id}"))
}
