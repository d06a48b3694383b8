//! Worker pool behavior against the in-memory job store.
//!
//! Covers dispatch, retry scheduling, dead-lettering, store error recovery,
//! handler timeouts, and graceful shutdown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use dossier_db::MemoryStore;
use dossier_jobs::{
    DeadLetterReason, JobContext, JobHandler, JobRepository, JobResult, JobStatus, JobType,
    JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent,
};

/// What a test handler does when invoked.
#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Sleep(Duration),
    Panic,
}

struct TestHandler {
    job_type: JobType,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
}

impl TestHandler {
    fn new(job_type: JobType, behavior: Behavior) -> Self {
        Self {
            job_type,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl JobHandler for TestHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = match self.behavior {
            Behavior::Succeed => JobResult::Success(Some(json!({"ok": true}))),
            Behavior::Fail => JobResult::Failed("handler exploded".into()),
            Behavior::Sleep(d) => {
                tokio::time::sleep(d).await;
                JobResult::Success(None)
            }
            Behavior::Panic => panic!("handler bug"),
        };
        self.finished.store(true, Ordering::SeqCst);
        result
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_worker_count(2)
        .with_idle_backoff(Duration::from_millis(10))
        .with_store_error_backoff(Duration::from_millis(10))
        .with_job_timeout(Duration::from_secs(5))
}

/// Wait for the first event matching `pred`.
async fn wait_for<F>(events: &mut broadcast::Receiver<WorkerEvent>, pred: F) -> WorkerEvent
where
    F: Fn(&WorkerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}

async fn enqueue(worker: &JobWorker, job_type: JobType, max_attempts: i32) -> Uuid {
    worker
        .enqueue(job_type, &json!({"engineer_id": 1}), 100, max_attempts)
        .await
        .expect("enqueue")
}

#[tokio::test]
async fn test_successful_job_is_marked_done() {
    let store = Arc::new(MemoryStore::new());
    let handler = TestHandler::new(JobType::AnalyzeActivity, Behavior::Succeed);
    let calls = handler.calls.clone();

    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config())
        .with_handler(handler)
        .build()
        .await;
    let mut events = worker.events();
    let job_id = enqueue(&worker, JobType::AnalyzeActivity, 0).await;

    let handle = worker.start();
    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobCompleted { job_id: id, .. } if *id == job_id)).await;
    handle.shutdown().await.unwrap();

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_job_is_scheduled_for_retry() {
    let store = Arc::new(MemoryStore::new());
    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config())
        .with_handler(TestHandler::new(JobType::AnalyzeActivity, Behavior::Fail))
        .build()
        .await;
    let mut events = worker.events();
    let job_id = enqueue(&worker, JobType::AnalyzeActivity, 3).await;

    let handle = worker.start();
    let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobRetryScheduled { .. })).await;
    handle.shutdown().await.unwrap();

    match event {
        WorkerEvent::JobRetryScheduled { job_id: id, attempts, error, .. } => {
            assert_eq!(id, job_id);
            assert_eq!(attempts, 1);
            assert_eq!(error, "handler exploded");
        }
        other => panic!("unexpected event {other:?}"),
    }

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retry);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.last_error.as_deref(), Some("handler exploded"));
    let next_try_at = job.next_try_at.expect("retry time");
    assert!(next_try_at > job.updated_at);
    assert!(store.list_dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exhausted_job_is_dead_lettered() {
    let store = Arc::new(MemoryStore::new());
    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config())
        .with_handler(TestHandler::new(JobType::ProcessResponse, Behavior::Fail))
        .build()
        .await;
    let mut events = worker.events();
    let job_id = enqueue(&worker, JobType::ProcessResponse, 1).await;

    let handle = worker.start();
    let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobDeadLettered { .. })).await;
    handle.shutdown().await.unwrap();

    assert!(matches!(
        event,
        WorkerEvent::JobDeadLettered { reason: DeadLetterReason::RetriesExhausted, .. }
    ));
    assert!(store.get(job_id).await.unwrap().is_none());

    let dead = store.list_dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, job_id);
    assert_eq!(dead[0].attempts, 1);
    assert_eq!(dead[0].reason, DeadLetterReason::RetriesExhausted);
    assert_eq!(dead[0].last_error.as_deref(), Some("handler exploded"));
}

#[tokio::test]
async fn test_unhandled_job_type_is_dead_lettered_immediately() {
    let store = Arc::new(MemoryStore::new());
    let worker = JobWorker::new(store.clone(), fast_config());
    let mut events = worker.events();
    let job_id = enqueue(&worker, JobType::ProcessResponse, 5).await;

    let handle = worker.start();
    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobDeadLettered { .. })).await;
    handle.shutdown().await.unwrap();

    let dead = store.list_dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, job_id);
    assert_eq!(dead[0].reason, DeadLetterReason::NoHandler);
    assert_eq!(dead[0].attempts, 0);
}

#[tokio::test]
async fn test_store_errors_do_not_stop_workers() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next_fetches(5).unwrap();

    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config().with_worker_count(1))
        .with_handler(TestHandler::new(JobType::AnalyzeActivity, Behavior::Succeed))
        .build()
        .await;
    let mut events = worker.events();
    let job_id = enqueue(&worker, JobType::AnalyzeActivity, 0).await;

    let handle = worker.start();
    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
    handle.shutdown().await.unwrap();

    assert_eq!(store.get(job_id).await.unwrap().unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn test_handler_timeout_counts_as_failure() {
    let store = Arc::new(MemoryStore::new());
    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config().with_job_timeout(Duration::from_millis(50)))
        .with_handler(TestHandler::new(
            JobType::AnalyzeActivity,
            Behavior::Sleep(Duration::from_secs(30)),
        ))
        .build()
        .await;
    let mut events = worker.events();
    enqueue(&worker, JobType::AnalyzeActivity, 1).await;

    let handle = worker.start();
    let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobDeadLettered { .. })).await;
    handle.shutdown().await.unwrap();

    match event {
        WorkerEvent::JobDeadLettered { error, reason, .. } => {
            assert_eq!(reason, DeadLetterReason::RetriesExhausted);
            assert!(error.contains("timeout"), "{error}");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_panicking_handler_fails_job_and_worker_survives() {
    let store = Arc::new(MemoryStore::new());
    let good = TestHandler::new(JobType::ProcessResponse, Behavior::Succeed);
    let good_calls = good.calls.clone();

    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config().with_worker_count(1))
        .with_handler(TestHandler::new(JobType::AnalyzeActivity, Behavior::Panic))
        .with_handler(good)
        .build()
        .await;
    let mut events = worker.events();

    let bad_id = worker
        .enqueue(JobType::AnalyzeActivity, &json!({}), 1, 1)
        .await
        .unwrap();
    let good_id = worker
        .enqueue(JobType::ProcessResponse, &json!({}), 100, 1)
        .await
        .unwrap();

    let handle = worker.start();
    let dead = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobDeadLettered { .. })).await;
    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobCompleted { job_id, .. } if *job_id == good_id)).await;
    handle.shutdown().await.unwrap();

    match dead {
        WorkerEvent::JobDeadLettered { job_id, reason, error, .. } => {
            assert_eq!(job_id, bad_id);
            assert_eq!(reason, DeadLetterReason::RetriesExhausted);
            assert!(error.contains("panicked"), "{error}");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(good_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get(good_id).await.unwrap().unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_job() {
    let store = Arc::new(MemoryStore::new());
    let handler = TestHandler::new(
        JobType::AnalyzeActivity,
        Behavior::Sleep(Duration::from_millis(200)),
    );
    let finished = handler.finished.clone();

    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config())
        .with_handler(handler)
        .build()
        .await;
    let mut events = worker.events();
    let job_id = enqueue(&worker, JobType::AnalyzeActivity, 0).await;

    let handle = worker.start();
    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    handle.shutdown().await.unwrap();

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(store.get(job_id).await.unwrap().unwrap().status, JobStatus::Done);
}

#[tokio::test]
async fn test_single_worker_claims_by_priority() {
    let store = Arc::new(MemoryStore::new());
    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config().with_worker_count(1))
        .with_handler(TestHandler::new(JobType::AnalyzeActivity, Behavior::Succeed))
        .build()
        .await;
    let mut events = worker.events();

    let low = worker
        .enqueue(JobType::AnalyzeActivity, &json!({}), 50, 0)
        .await
        .unwrap();
    let high = worker
        .enqueue(JobType::AnalyzeActivity, &json!({}), 1, 0)
        .await
        .unwrap();

    let handle = worker.start();
    let first = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    let second = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    handle.shutdown().await.unwrap();

    assert!(matches!(first, WorkerEvent::JobStarted { job_id, .. } if job_id == high));
    assert!(matches!(second, WorkerEvent::JobStarted { job_id, .. } if job_id == low));
}

#[tokio::test]
async fn test_disabled_worker_processes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let worker = WorkerBuilder::new(store.clone())
        .with_config(fast_config().with_enabled(false))
        .with_handler(TestHandler::new(JobType::AnalyzeActivity, Behavior::Succeed))
        .build()
        .await;
    let job_id = enqueue(&worker, JobType::AnalyzeActivity, 0).await;

    let handle = worker.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().await.unwrap();

    assert_eq!(store.get(job_id).await.unwrap().unwrap().status, JobStatus::Queued);
}
