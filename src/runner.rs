use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::{self, Duration, Instant};

use crate::artifact::{ArtifactStore, StoredArtifact};
use crate::config::OrchestratorConfig;
use crate::error::FailureCode;
use crate::notify::{events, NotificationSink};
use crate::provider::{GenerationArtifact, GenerationProvider, OperationHandle, PollOutcome};
use crate::queue::job::{JobId, JobStatus, QueuedEntry};
use crate::queue::AdmissionQueue;
use crate::store::{JobStore, JobUpdate};

/// Persisted error messages are truncated to this many characters.
const MAX_ERROR_LEN: usize = 500;

const TIMEOUT_MESSAGE: &str = "generation timed out waiting for the provider";

/// Drives one admitted job from provider submission through poll-until-
/// terminal, then reports back to the admission queue to free the owner's
/// slot.
pub struct JobRunner {
    config: OrchestratorConfig,
    queue: Arc<RwLock<AdmissionQueue>>,
    provider: Arc<dyn GenerationProvider>,
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl JobRunner {
    pub fn new(
        config: OrchestratorConfig,
        queue: Arc<RwLock<AdmissionQueue>>,
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            queue,
            provider,
            store,
            artifacts,
            notifier,
        }
    }

    /// Run one job to a terminal state. The entry must hold an admission
    /// slot (it came out of `enqueue` or `next_admissible`).
    pub async fn run(&self, entry: QueuedEntry) {
        match self.provider.submit(&entry.request.task).await {
            Ok(operation) => self.poll_until_terminal(entry, operation).await,
            Err(err) => self.handle_submit_failure(entry, err.0).await,
        }
    }

    /// Submission retries go back through admission: release the slot first
    /// so the retry competes with other pending work, then requeue.
    async fn handle_submit_failure(&self, entry: QueuedEntry, error: String) {
        let job_id = entry.job_id();
        if entry.retry_count < self.config.max_retries {
            tracing::warn!(
                job_id = %job_id,
                owner = %entry.owner_id(),
                retry = entry.retry_count + 1,
                error = %error,
                "Submission failed, requeueing"
            );
            {
                let mut queue = self.queue.write().await;
                queue.release(&job_id);
                queue.requeue_retry(entry.into_retry());
            }
            self.update_record(
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Queued),
                    error: Some(truncate(&error)),
                    ..Default::default()
                },
            )
            .await;
        } else {
            let owner_id = entry.owner_id().to_string();
            self.fail(
                job_id,
                &owner_id,
                FailureCode::SubmissionFailed,
                &format!("generation could not be submitted: {}", error),
            )
            .await;
        }
    }

    async fn poll_until_terminal(&self, entry: QueuedEntry, operation: OperationHandle) {
        let job_id = entry.job_id();
        let owner_id = entry.owner_id().to_string();
        let kind = entry.request.task.kind();

        self.update_record(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Processing),
                operation_id: Some(operation.as_str().to_string()),
                ..Default::default()
            },
        )
        .await;
        self.notifier
            .publish_to_user(
                &owner_id,
                events::JOB_STARTED,
                json!({ "job_id": job_id, "kind": kind }),
            )
            .await;
        tracing::info!(job_id = %job_id, owner = %owner_id, operation = %operation, "Generation submitted");

        time::sleep(self.config.initial_poll_delay).await;

        // Wall-clock budget for the poll phase; holds even when transient
        // poll errors keep the attempt counter from advancing.
        let deadline = Instant::now() + self.config.poll_interval * self.config.max_poll_attempts;
        let mut attempts: u32 = 0;
        let mut consecutive_errors: u32 = 0;

        loop {
            if Instant::now() >= deadline {
                self.fail(job_id, &owner_id, FailureCode::TimedOut, TIMEOUT_MESSAGE)
                    .await;
                return;
            }
            match self.provider.poll(&operation).await {
                Ok(PollOutcome::Completed(artifact)) => {
                    self.complete(job_id, &owner_id, kind, artifact).await;
                    return;
                }
                Ok(PollOutcome::Failed { error }) => {
                    // Provider-reported failures are terminal, never retried.
                    self.fail(job_id, &owner_id, FailureCode::ProviderFailed, &error)
                        .await;
                    return;
                }
                Ok(PollOutcome::Processing) => {
                    attempts += 1;
                    consecutive_errors = 0;
                    if attempts >= self.config.max_poll_attempts {
                        self.fail(job_id, &owner_id, FailureCode::TimedOut, TIMEOUT_MESSAGE)
                            .await;
                        return;
                    }
                    self.update_record(
                        job_id,
                        JobUpdate {
                            poll_attempts: Some(attempts),
                            ..Default::default()
                        },
                    )
                    .await;
                    time::sleep(self.config.poll_interval).await;
                }
                Err(err) => {
                    // Transient infrastructure failure: back off without
                    // consuming the poll-attempt budget.
                    consecutive_errors += 1;
                    let backoff = poll_backoff(
                        self.config.poll_interval,
                        consecutive_errors,
                        self.config.max_poll_backoff,
                    );
                    tracing::warn!(
                        job_id = %job_id,
                        consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Status poll failed, backing off"
                    );
                    self.update_record(
                        job_id,
                        JobUpdate {
                            error: Some(truncate(&err.0)),
                            ..Default::default()
                        },
                    )
                    .await;
                    time::sleep(backoff).await;
                }
            }
        }
    }

    /// Terminal success transition. Safe to invoke more than once for the
    /// same job id: only the call that actually releases the admission slot
    /// persists and publishes.
    pub async fn complete(
        &self,
        job_id: JobId,
        owner_id: &str,
        kind: &str,
        artifact: GenerationArtifact,
    ) {
        if !self.queue.write().await.release(&job_id) {
            return;
        }
        let stored = match self.artifacts.persist(job_id, &artifact).await {
            Ok(stored) => stored,
            Err(err) => {
                // A failed copy into durable storage must not flip a
                // successful generation to failed; keep the provider's URLs.
                tracing::warn!(
                    job_id = %job_id,
                    error = %err,
                    "Artifact persistence failed, keeping provider references"
                );
                StoredArtifact {
                    video_url: artifact.result_url.clone(),
                    thumbnail_url: artifact.thumbnail_url.clone(),
                }
            }
        };
        self.update_record(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Completed),
                video_url: Some(stored.video_url.clone()),
                thumbnail_url: stored.thumbnail_url.clone(),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;
        let payload = json!({
            "job_id": job_id,
            "kind": kind,
            "video_url": stored.video_url,
            "thumbnail_url": stored.thumbnail_url,
        });
        self.notifier
            .publish_to_user(owner_id, events::JOB_COMPLETED, payload.clone())
            .await;
        self.notifier.publish(events::JOB_COMPLETED, payload).await;
        tracing::info!(job_id = %job_id, owner = %owner_id, "Job completed");
    }

    /// Terminal failure transition; idempotent like [`JobRunner::complete`].
    pub async fn fail(&self, job_id: JobId, owner_id: &str, code: FailureCode, message: &str) {
        if !self.queue.write().await.release(&job_id) {
            return;
        }
        let message = truncate(message);
        self.update_record(
            job_id,
            JobUpdate {
                status: Some(JobStatus::Failed),
                error: Some(message.clone()),
                failure_code: Some(code),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;
        let payload = json!({ "job_id": job_id, "code": code, "error": message });
        self.notifier
            .publish_to_user(owner_id, events::JOB_FAILED, payload.clone())
            .await;
        self.notifier.publish(events::JOB_FAILED, payload).await;
        tracing::info!(job_id = %job_id, owner = %owner_id, code = %code, "Job failed");
    }

    async fn update_record(&self, job_id: JobId, update: JobUpdate) {
        if let Err(err) = self.store.update(job_id, update).await {
            tracing::warn!(job_id = %job_id, error = %err, "Job record update failed");
        }
    }
}

fn poll_backoff(base: Duration, consecutive_errors: u32, cap: Duration) -> Duration {
    // The cap dominates long before the exponent could overflow.
    let exponent = consecutive_errors.min(6);
    (base * 2u32.saturating_pow(exponent)).min(cap)
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_ERROR_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let base = Duration::from_secs(10);
        let cap = Duration::from_secs(60);
        assert_eq!(poll_backoff(base, 1, cap), Duration::from_secs(20));
        assert_eq!(poll_backoff(base, 2, cap), Duration::from_secs(40));
        assert_eq!(poll_backoff(base, 3, cap), Duration::from_secs(60));
        assert_eq!(poll_backoff(base, 10, cap), Duration::from_secs(60));
    }

    #[test]
    fn truncate_bounds_long_messages() {
        let long = "x".repeat(2 * MAX_ERROR_LEN);
        assert_eq!(truncate(&long).len(), MAX_ERROR_LEN);
        assert_eq!(truncate("short"), "short");
    }
}
