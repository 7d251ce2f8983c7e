use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::error::FailureCode;
use crate::limiter::RequestRateLimiter;
use crate::queue::AdmissionQueue;
use crate::runner::JobRunner;

/// Background dispatch loop. A single cooperative task scans the admission
/// queue on a short tick and hands each admissible entry to a spawned
/// [`JobRunner`] task, never waiting for jobs to finish. A slower tick sweeps
/// for in-flight entries stuck past the safety threshold so a defective job
/// task cannot leak its owner's capacity forever.
pub struct Scheduler {
    config: OrchestratorConfig,
    queue: Arc<RwLock<AdmissionQueue>>,
    limiter: Arc<Mutex<RequestRateLimiter>>,
    runner: Arc<JobRunner>,
}

impl Scheduler {
    pub fn new(
        config: OrchestratorConfig,
        queue: Arc<RwLock<AdmissionQueue>>,
        limiter: Arc<Mutex<RequestRateLimiter>>,
        runner: Arc<JobRunner>,
    ) -> Self {
        Self {
            config,
            queue,
            limiter,
            runner,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut dispatch_tick = time::interval(self.config.dispatch_interval);
        let mut sweep_tick = time::interval(self.config.sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = dispatch_tick.tick() => {
                    let dispatched = self.dispatch_ready().await;
                    if dispatched > 0 {
                        tracing::debug!(dispatched, "Dispatched admissible jobs");
                    }
                }
                _ = sweep_tick.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Hand every currently admissible entry to its own runner task. Each
    /// job is isolated in a spawned task, so a misbehaving job cannot stall
    /// this loop or block admission of others.
    async fn dispatch_ready(&self) -> usize {
        let mut dispatched = 0;
        loop {
            let entry = self.queue.write().await.next_admissible();
            let Some(entry) = entry else { break };
            tracing::info!(
                job_id = %entry.job_id(),
                owner = %entry.owner_id(),
                retry = entry.retry_count,
                "Dispatching job"
            );
            let runner = self.runner.clone();
            tokio::spawn(async move {
                runner.run(entry).await;
            });
            dispatched += 1;
        }
        dispatched
    }

    /// Force-fail in-flight entries older than the safety threshold and drop
    /// idle rate-limiter buckets.
    async fn sweep(&self) {
        let stuck = self
            .queue
            .read()
            .await
            .stuck_in_flight(self.config.stuck_age_threshold);
        for (job_id, owner_id) in stuck {
            tracing::error!(
                job_id = %job_id,
                owner = %owner_id,
                "In-flight job exceeded the safety age, releasing its slot"
            );
            self.runner
                .fail(
                    job_id,
                    &owner_id,
                    FailureCode::Stuck,
                    "generation was abandoned after exceeding the safety age limit",
                )
                .await;
        }

        let pruned = self.limiter.lock().await.prune_idle();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned idle rate-limiter entries");
        }
    }
}
