use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::FailureCode;
use crate::queue::job::{JobId, JobRequest, JobStatus};

/// Durable mirror of one job's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub owner_id: String,
    pub kind: String,
    pub status: JobStatus,
    pub operation_id: Option<String>,
    pub poll_attempts: u32,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
    pub failure_code: Option<FailureCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(request: &JobRequest, status: JobStatus) -> Self {
        let now = Utc::now();
        Self {
            id: request.id,
            owner_id: request.owner_id.clone(),
            kind: request.task.kind().to_string(),
            status,
            operation_id: None,
            poll_attempts: 0,
            video_url: None,
            thumbnail_url: None,
            error: None,
            failure_code: None,
            created_at: request.created_at,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Partial update applied to a job record; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub operation_id: Option<String>,
    pub poll_attempts: Option<u32>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error: Option<String>,
    pub failure_code: Option<FailureCode>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Error, Debug, Clone)]
#[error("job store error: {0}")]
pub struct StoreError(pub String);

/// Persistence boundary for job records. Writes are best-effort relative to
/// the in-memory state machine: callers log failures and keep going.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, record: JobRecord) -> Result<(), StoreError>;

    async fn update(&self, job_id: JobId, update: JobUpdate) -> Result<(), StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;
}

/// In-memory record store, used in tests and single-process deployments
/// where durability across restarts is not required.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, record: JobRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.entry(record.id) {
            Entry::Occupied(_) => Err(StoreError(format!("job {} already exists", record.id))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn update(&self, job_id: JobId, update: JobUpdate) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&job_id)
            .ok_or_else(|| StoreError(format!("job {} not found", job_id)))?;
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(operation_id) = update.operation_id {
            record.operation_id = Some(operation_id);
        }
        if let Some(poll_attempts) = update.poll_attempts {
            record.poll_attempts = poll_attempts;
        }
        if let Some(video_url) = update.video_url {
            record.video_url = Some(video_url);
        }
        if let Some(thumbnail_url) = update.thumbnail_url {
            record.thumbnail_url = Some(thumbnail_url);
        }
        if let Some(error) = update.error {
            record.error = Some(error);
        }
        if let Some(failure_code) = update.failure_code {
            record.failure_code = Some(failure_code);
        }
        if let Some(completed_at) = update.completed_at {
            record.completed_at = Some(completed_at);
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(&job_id).cloned())
    }
}
