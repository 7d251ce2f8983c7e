
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use clipforge::error::{FailureCode, OrchestratorError};
use clipforge::notify::events;
use clipforge::provider::{AspectRatio, GenerationTask};
use clipforge::queue::{JobPriority, JobRequest, JobStatus};
use clipforge::store::{JobStore, MemoryJobStore};
use clipforge::Orchestrator;

use test_harness::{
    assert_eventually, request_for, test_config, FakeArtifactStore, ManualProvider,
    RecordingSink, ScriptedProvider,
};

struct App {
    orchestrator: Orchestrator,
    store: Arc<MemoryJobStore>,
    sink: Arc<RecordingSink>,
    shutdown: CancellationToken,
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn start<P>(config: clipforge::config::OrchestratorConfig, provider: Arc<P>) -> App
where
    P: clipforge::provider::GenerationProvider + 'static,
{
    let store = Arc::new(MemoryJobStore::new());
    let sink = Arc::new(RecordingSink::new());
    let orchestrator = Orchestrator::new(
        config,
        provider,
        store.clone(),
        Arc::new(FakeArtifactStore::new()),
        sink.clone(),
    );
    let shutdown = CancellationToken::new();
    orchestrator.spawn(shutdown.clone());
    App {
        orchestrator,
        store,
        sink,
        shutdown,
    }
}

#[tokio::test(start_paused = true)]
async fn third_job_queues_and_dispatches_when_a_slot_frees() {
    let provider = Arc::new(ManualProvider::new());
    let app = start(test_config(), provider.clone());

    let j1 = request_for("alice");
    let j2 = request_for("alice");
    let j3 = request_for("alice");
    let j1_id = j1.id;
    let j3_id = j3.id;

    let outcome = app
        .orchestrator
        .enqueue_job(j1, JobPriority::Normal)
        .await
        .unwrap();
    assert!(!outcome.queued);
    assert_eq!(outcome.position, None);

    let outcome = app
        .orchestrator
        .enqueue_job(j2, JobPriority::Normal)
        .await
        .unwrap();
    assert!(!outcome.queued);

    let outcome = app
        .orchestrator
        .enqueue_job(j3, JobPriority::Normal)
        .await
        .unwrap();
    assert!(outcome.queued);
    assert_eq!(outcome.position, Some(1));
    assert_eq!(app.orchestrator.job_position(j3_id).await, 1);
    assert_eq!(app.sink.count_named(events::JOB_QUEUED).await, 1);

    // J1 finishes; the dispatch loop admits J3 on its next scan. Submission
    // order across spawned runner tasks is not deterministic, so finish J1
    // via the operation handle its record carries.
    assert_eventually(
        || async {
            app.store
                .get(j1_id)
                .await
                .unwrap()
                .map(|r| r.operation_id.is_some())
                .unwrap_or(false)
        },
        Duration::from_secs(5),
        "J1 was never submitted",
    )
    .await;
    let operation_id = app
        .store
        .get(j1_id)
        .await
        .unwrap()
        .unwrap()
        .operation_id
        .unwrap();
    provider.complete_operation_id(&operation_id).await;
    assert_eventually(
        || async {
            app.store
                .get(j1_id)
                .await
                .unwrap()
                .map(|r| r.status == JobStatus::Completed)
                .unwrap_or(false)
        },
        Duration::from_secs(5),
        "J1 never completed",
    )
    .await;

    assert_eventually(
        || async { app.orchestrator.job_position(j3_id).await == 0 },
        Duration::from_secs(5),
        "J3 was never dispatched",
    )
    .await;

    let stats = app.orchestrator.queue_status().await;
    assert_eq!(stats.per_user["alice"].in_flight, 2);
    assert_eq!(stats.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn slot_conservation_across_many_jobs() {
    let config = test_config();
    let provider = Arc::new(ScriptedProvider::completing());
    let app = start(config, provider);

    let mut ids = Vec::new();
    for _ in 0..6 {
        let request = request_for("alice");
        ids.push(request.id);
        app.orchestrator
            .enqueue_job(request, JobPriority::Normal)
            .await
            .unwrap();
        let stats = app.orchestrator.queue_status().await;
        assert!(
            stats
                .per_user
                .get("alice")
                .map(|u| u.in_flight <= 2)
                .unwrap_or(true),
            "admission cap violated"
        );
    }

    assert_eventually(
        || async {
            let mut done = 0;
            for id in &ids {
                if let Some(record) = app.store.get(*id).await.unwrap() {
                    if record.status.is_terminal() {
                        done += 1;
                    }
                }
            }
            done == ids.len()
        },
        Duration::from_secs(30),
        "not all jobs reached a terminal state",
    )
    .await;

    // Every slot was given back.
    let stats = app.orchestrator.queue_status().await;
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(app.sink.count_named(events::JOB_COMPLETED).await, 12);
}

#[tokio::test(start_paused = true)]
async fn cancel_applies_to_pending_jobs_only() {
    let provider = Arc::new(ManualProvider::new());
    let app = start(test_config(), provider);

    let j1 = request_for("alice");
    let j2 = request_for("alice");
    let j3 = request_for("alice");
    let j1_id = j1.id;
    let j3_id = j3.id;
    app.orchestrator
        .enqueue_job(j1, JobPriority::Normal)
        .await
        .unwrap();
    app.orchestrator
        .enqueue_job(j2, JobPriority::Normal)
        .await
        .unwrap();
    app.orchestrator
        .enqueue_job(j3, JobPriority::Normal)
        .await
        .unwrap();

    // In-flight jobs are not cancellable.
    assert!(!app.orchestrator.cancel_job(j1_id, "alice").await);
    // Wrong owner.
    assert!(!app.orchestrator.cancel_job(j3_id, "mallory").await);

    assert!(app.orchestrator.cancel_job(j3_id, "alice").await);
    assert!(!app.orchestrator.cancel_job(j3_id, "alice").await);

    let record = app.store.get(j3_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.failure_code, Some(FailureCode::Cancelled));
    assert_eq!(record.error.as_deref(), Some("cancelled by user"));
    assert_eq!(app.orchestrator.job_position(j3_id).await, 0);
    assert_eq!(app.sink.count_named(events::JOB_FAILED).await, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_requests_never_reach_the_queue() {
    let mut config = test_config();
    config.rate_limit_max_requests = 2;
    config.rate_limit_window = Duration::from_secs(60);
    let provider = Arc::new(ManualProvider::new());
    let app = start(config, provider);

    app.orchestrator
        .enqueue_job(request_for("alice"), JobPriority::Normal)
        .await
        .unwrap();
    app.orchestrator
        .enqueue_job(request_for("alice"), JobPriority::Normal)
        .await
        .unwrap();

    let err = app
        .orchestrator
        .enqueue_job(request_for("alice"), JobPriority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::RateLimited { .. }));

    let stats = app.orchestrator.queue_status().await;
    assert_eq!(stats.in_flight + stats.pending, 2);
    // Other users are unaffected.
    app.orchestrator
        .enqueue_job(request_for("bob"), JobPriority::Normal)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejects_invalid_tasks_before_admission() {
    let provider = Arc::new(ManualProvider::new());
    let app = start(test_config(), provider);

    let bad = JobRequest::new(
        "alice",
        GenerationTask::TextToVideo {
            prompt: "  ".to_string(),
            duration_secs: 5,
            aspect_ratio: AspectRatio::Landscape,
        },
    );
    let err = app
        .orchestrator
        .enqueue_job(bad, JobPriority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTask(_)));
    assert!(app.store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn full_pending_queue_rejects_new_work() {
    let mut config = test_config();
    config.max_concurrent_per_user = 1;
    config.max_pending = 1;
    let provider = Arc::new(ManualProvider::new());
    let app = start(config, provider);

    app.orchestrator
        .enqueue_job(request_for("alice"), JobPriority::Normal)
        .await
        .unwrap();
    app.orchestrator
        .enqueue_job(request_for("alice"), JobPriority::Normal)
        .await
        .unwrap();
    let err = app
        .orchestrator
        .enqueue_job(request_for("alice"), JobPriority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::QueueFull));
}

#[tokio::test(start_paused = true)]
async fn sweep_releases_stuck_jobs() {
    let mut config = test_config();
    // Stuck threshold far below the poll budget so the sweep fires first.
    config.stuck_age_threshold = Duration::from_millis(200);
    config.sweep_interval = Duration::from_millis(100);
    config.poll_interval = Duration::from_secs(10);
    config.max_poll_attempts = 120;
    let provider = Arc::new(ManualProvider::new());
    let app = start(config, provider);

    let j1 = request_for("alice");
    let j1_id = j1.id;
    app.orchestrator
        .enqueue_job(j1, JobPriority::Normal)
        .await
        .unwrap();

    assert_eventually(
        || async {
            app.store
                .get(j1_id)
                .await
                .unwrap()
                .map(|r| r.failure_code == Some(FailureCode::Stuck))
                .unwrap_or(false)
        },
        Duration::from_secs(5),
        "stuck job was never swept",
    )
    .await;

    let stats = app.orchestrator.queue_status().await;
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn provider_failure_surfaces_in_record_and_notifications() {
    let provider = Arc::new(ManualProvider::new());
    let app = start(test_config(), provider.clone());

    let j1 = request_for("alice");
    let j1_id = j1.id;
    app.orchestrator
        .enqueue_job(j1, JobPriority::Normal)
        .await
        .unwrap();
    provider.fail_operation(1, "upstream capacity exhausted").await;

    assert_eventually(
        || async {
            app.store
                .get(j1_id)
                .await
                .unwrap()
                .map(|r| r.status == JobStatus::Failed)
                .unwrap_or(false)
        },
        Duration::from_secs(5),
        "provider failure never surfaced",
    )
    .await;

    let record = app.store.get(j1_id).await.unwrap().unwrap();
    assert_eq!(record.failure_code, Some(FailureCode::ProviderFailed));
    assert_eq!(record.error.as_deref(), Some("upstream capacity exhausted"));
    assert_eq!(app.sink.count_named(events::JOB_FAILED).await, 2);
}
