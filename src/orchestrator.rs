use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactStore;
use crate::config::OrchestratorConfig;
use crate::error::{FailureCode, OrchestratorError, Result};
use crate::limiter::{RateDecision, RequestRateLimiter};
use crate::notify::{events, NotificationSink};
use crate::provider::GenerationProvider;
use crate::queue::{Admission, AdmissionQueue, JobId, JobPriority, JobRequest, JobStatus, QueueStats};
use crate::runner::JobRunner;
use crate::scheduler::Scheduler;
use crate::store::{JobRecord, JobStore, JobUpdate};

/// Result of an enqueue call: admitted immediately (`queued == false`) or
/// parked at a 1-based pending position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueOutcome {
    pub queued: bool,
    pub position: Option<usize>,
}

/// Owns the orchestration core: admission queue, rate limiter, runner and
/// scheduler, wired to the consumed capabilities at construction. The boot
/// sequence builds exactly one and hands it to the API layer.
pub struct Orchestrator {
    config: OrchestratorConfig,
    queue: Arc<RwLock<AdmissionQueue>>,
    limiter: Arc<Mutex<RequestRateLimiter>>,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn NotificationSink>,
    runner: Arc<JobRunner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let queue = Arc::new(RwLock::new(AdmissionQueue::with_capacity(
            config.max_concurrent_per_user,
            config.max_pending,
        )));
        let limiter = Arc::new(Mutex::new(RequestRateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window,
        )));
        let runner = Arc::new(JobRunner::new(
            config.clone(),
            queue.clone(),
            provider,
            store.clone(),
            artifacts,
            notifier.clone(),
        ));
        Self {
            config,
            queue,
            limiter,
            store,
            notifier,
            runner,
        }
    }

    /// Start the background dispatch loop. The loop exits when `shutdown`
    /// is cancelled; in-flight jobs keep running on their own tasks.
    pub fn spawn(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = Scheduler::new(
            self.config.clone(),
            self.queue.clone(),
            self.limiter.clone(),
            self.runner.clone(),
        );
        tokio::spawn(async move {
            scheduler.run(shutdown).await;
        })
    }

    /// Validate, rate-limit and admit one job request. Immediately admitted
    /// requests start their runner task before this call returns; queued
    /// requests wait for the dispatch loop.
    pub async fn enqueue_job(
        &self,
        request: JobRequest,
        priority: JobPriority,
    ) -> Result<EnqueueOutcome> {
        request.task.validate()?;

        if let RateDecision::Limited { retry_after } =
            self.limiter.lock().await.check(&request.owner_id)
        {
            tracing::warn!(owner = %request.owner_id, "Request rate limited");
            return Err(OrchestratorError::RateLimited { retry_after });
        }

        let job_id = request.id;
        let owner_id = request.owner_id.clone();
        let admission = self.queue.write().await.enqueue(request.clone(), priority);
        match admission {
            Admission::Dispatched(entry) => {
                self.create_record(JobRecord::new(&request, JobStatus::Processing))
                    .await;
                tracing::info!(job_id = %job_id, owner = %owner_id, "Job admitted immediately");
                let runner = self.runner.clone();
                tokio::spawn(async move {
                    runner.run(entry).await;
                });
                Ok(EnqueueOutcome {
                    queued: false,
                    position: None,
                })
            }
            Admission::Queued { position } => {
                self.create_record(JobRecord::new(&request, JobStatus::Queued))
                    .await;
                self.notifier
                    .publish_to_user(
                        &owner_id,
                        events::JOB_QUEUED,
                        json!({ "job_id": job_id, "position": position }),
                    )
                    .await;
                tracing::info!(job_id = %job_id, owner = %owner_id, position, "Job queued");
                Ok(EnqueueOutcome {
                    queued: true,
                    position: Some(position),
                })
            }
            Admission::Rejected => {
                tracing::warn!(job_id = %job_id, owner = %owner_id, "Pending queue full");
                Err(OrchestratorError::QueueFull)
            }
        }
    }

    /// Cancel a job that has not been dispatched yet. Returns whether a
    /// pending entry owned by `owner_id` was removed; in-flight jobs are
    /// not cancellable.
    pub async fn cancel_job(&self, job_id: JobId, owner_id: &str) -> bool {
        if self.queue.write().await.cancel(&job_id, owner_id).is_none() {
            return false;
        }
        self.update_record(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Failed),
                error: Some("cancelled by user".to_string()),
                failure_code: Some(FailureCode::Cancelled),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;
        self.notifier
            .publish_to_user(
                owner_id,
                events::JOB_FAILED,
                json!({
                    "job_id": job_id,
                    "code": FailureCode::Cancelled,
                    "error": "cancelled by user",
                }),
            )
            .await;
        tracing::info!(job_id = %job_id, owner = %owner_id, "Pending job cancelled");
        true
    }

    /// Read-only queue snapshot for observability endpoints.
    pub async fn queue_status(&self) -> QueueStats {
        self.queue.read().await.stats()
    }

    /// 1-based pending rank, or 0 once dispatched (or unknown).
    pub async fn job_position(&self, job_id: JobId) -> usize {
        self.queue.read().await.position(&job_id)
    }

    async fn create_record(&self, record: JobRecord) {
        let job_id = record.id;
        if let Err(err) = self.store.create(record).await {
            tracing::warn!(job_id = %job_id, error = %err, "Job record create failed");
        }
    }

    async fn update_record(&self, job_id: JobId, update: JobUpdate) {
        if let Err(err) = self.store.update(job_id, update).await {
            tracing::warn!(job_id = %job_id, error = %err, "Job record update failed");
        }
    }
}
