use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::provider::GenerationTask;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Dispatch priority. Higher dispatches first; ties break on queue age.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    #[default]
    Normal,
    High,
}

/// Immutable description of one generation job, built by the caller at
/// enqueue time.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: JobId,
    pub owner_id: String,
    pub task: GenerationTask,
    pub created_at: DateTime<Utc>,
}

impl JobRequest {
    pub fn new(owner_id: impl Into<String>, task: GenerationTask) -> Self {
        Self::with_id(Uuid::new_v4(), owner_id, task)
    }

    pub fn with_id(id: JobId, owner_id: impl Into<String>, task: GenerationTask) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            task,
            created_at: Utc::now(),
        }
    }
}

/// A request waiting for (or holding) an admission slot.
#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub request: JobRequest,
    pub priority: JobPriority,
    pub queued_at: Instant,
    pub retry_count: u32,
}

impl QueuedEntry {
    pub fn new(request: JobRequest, priority: JobPriority) -> Self {
        Self {
            request,
            priority,
            queued_at: Instant::now(),
            retry_count: 0,
        }
    }

    /// Fresh queue identity for a submission retry. Priority resets to
    /// normal and the queue age restarts.
    pub fn into_retry(mut self) -> Self {
        self.retry_count += 1;
        self.priority = JobPriority::Normal;
        self.queued_at = Instant::now();
        self
    }

    pub fn job_id(&self) -> JobId {
        self.request.id
    }

    pub fn owner_id(&self) -> &str {
        &self.request.owner_id
    }
}
