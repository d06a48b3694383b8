//! Integration tests for the Postgres repositories.
//!
//! Require a database with migrations applied:
//! `DATABASE_URL=postgres://... cargo test -p dossier-db -- --ignored`

use dossier_db::{
    AppliedBy, ContextRepository, Database, DeadLetterReason, JobRepository, JobStatus, NewJob,
    QuestionSink, DEFAULT_TEST_DATABASE_URL,
};
use serde_json::json;

async fn setup_test_db() -> Database {
    dotenvy::dotenv().ok();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_TEST_DATABASE_URL.to_string());
    Database::connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

fn unique_engineer() -> i64 {
    // Keep runs independent without truncating shared tables.
    (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as i64 + 1_000_000
}

#[tokio::test]
#[ignore] // Requires database connection with migrations applied
async fn test_claim_update_and_dead_letter() {
    let db = setup_test_db().await;

    let id = db
        .jobs
        .enqueue(NewJob::new("test.pg_claim", b"payload".to_vec()).with_priority(-1000))
        .await
        .unwrap();

    let mut job = db.jobs.fetch_next_eligible().await.unwrap().expect("job");
    assert_eq!(job.id, id);

    job.status = JobStatus::Retry;
    job.attempts = 1;
    job.last_error = Some("first failure".to_string());
    db.jobs.update(&job).await.unwrap();

    let stored = db.jobs.get(id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.status, JobStatus::Retry);

    db.jobs
        .move_to_dead_letter(&stored, DeadLetterReason::RetriesExhausted)
        .await
        .unwrap();
    assert!(db.jobs.get(id).await.unwrap().is_none());

    let dead: Vec<_> = db
        .jobs
        .list_dead_letters()
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.job_id == id)
        .collect();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, b"payload".to_vec());
}

#[tokio::test]
#[ignore] // Requires database connection with migrations applied
async fn test_context_upsert_bumps_version() {
    let db = setup_test_db().await;
    let engineer = unique_engineer();

    let v1 = db
        .contexts
        .upsert_current(engineer, &json!({"people": ["Jane"]}), AppliedBy::Ai)
        .await
        .unwrap();
    let v2 = db
        .contexts
        .upsert_current(engineer, &json!({"people": ["Jane", "Omar"]}), AppliedBy::User)
        .await
        .unwrap();
    assert_eq!((v1, v2), (1, 2));

    let history = db.contexts.get_history(engineer).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 2);

    let question = db.questions.create(engineer, "Which Jane?").await.unwrap();
    assert!(question > 0);
}

#[tokio::test]
#[ignore] // Requires database connection with migrations applied
async fn test_context_replace_checks_version() {
    let db = setup_test_db().await;
    let engineer = unique_engineer();

    let v1 = db
        .contexts
        .replace_current(engineer, 0, &json!({"people": ["Jane"]}), AppliedBy::Ai)
        .await
        .unwrap();
    assert_eq!(v1, 1);

    let stale = db
        .contexts
        .replace_current(engineer, 0, &json!({"people": ["Omar"]}), AppliedBy::Ai)
        .await
        .unwrap_err();
    assert!(stale.is_version_conflict(), "{stale}");

    let v2 = db
        .contexts
        .replace_current(engineer, 1, &json!({"people": ["Jane", "Omar"]}), AppliedBy::Ai)
        .await
        .unwrap();
    assert_eq!(v2, 2);

    let current = db.contexts.get_current(engineer).await.unwrap().unwrap();
    assert_eq!(current.context, json!({"people": ["Jane", "Omar"]}));
    assert_eq!(db.contexts.get_history(engineer).await.unwrap().len(), 2);
}
