//! Job queue repository.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use dossier_core::{
    defaults, DeadLetterJob, DeadLetterReason, Error, Job, JobRepository, NewJob, Result,
};

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempts, max_attempts, priority, \
     scheduled_at, next_try_at, last_error, created_at, updated_at";

/// PostgreSQL implementation of JobRepository.
///
/// A claimed row is hidden by `lease_expires_at` until the worker writes it
/// back with [`JobRepository::update`]. If the worker's process dies, the row
/// becomes eligible again once the lease runs out.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    lease: ChronoDuration,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            lease: ChronoDuration::seconds(defaults::JOB_CLAIM_LEASE_SECS as i64),
        }
    }

    /// Override the claim lease. Keep it longer than the job timeout.
    pub fn with_lease(mut self, lease: std::time::Duration) -> Self {
        self.lease = ChronoDuration::from_std(lease).unwrap_or(self.lease);
        self
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            job_type: row.get("job_type"),
            payload: row.get("payload"),
            status: status.parse()?,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            priority: row.get("priority"),
            scheduled_at: row.get("scheduled_at"),
            next_try_at: row.get("next_try_at"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_dead_letter_row(row: sqlx::postgres::PgRow) -> Result<DeadLetterJob> {
        let reason: String = row.get("reason");
        Ok(DeadLetterJob {
            id: row.get("id"),
            job_id: row.get("job_id"),
            job_type: row.get("job_type"),
            payload: row.get("payload"),
            attempts: row.get("attempts"),
            last_error: row.get("last_error"),
            reason: reason.parse()?,
            failed_at: row.get("failed_at"),
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(&self, new_job: NewJob) -> Result<Uuid> {
        let job = new_job.into_job(Uuid::now_v7(), Utc::now());

        sqlx::query(
            "INSERT INTO jobs (id, job_type, payload, status, attempts, max_attempts, priority,
                               scheduled_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $8, $8)",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.max_attempts)
        .bind(job.priority)
        .bind(job.scheduled_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "jobs",
            job_id = %job.id,
            job_type = %job.job_type,
            priority = job.priority,
            "Job enqueued"
        );
        Ok(job.id)
    }

    async fn fetch_next_eligible(&self) -> Result<Option<Job>> {
        let now = Utc::now();

        // Single statement: select-and-lease is atomic under SKIP LOCKED, so
        // concurrent workers never receive the same row.
        let sql = format!(
            "UPDATE jobs
             SET lease_expires_at = $2
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status IN ('queued', 'retry')
                   AND scheduled_at <= $1
                   AND (next_try_at IS NULL OR next_try_at <= $1)
                   AND (lease_expires_at IS NULL OR lease_expires_at <= $1)
                 ORDER BY priority ASC, scheduled_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(now)
            .bind(now + self.lease)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = $1, attempts = $2, max_attempts = $3, priority = $4,
                 scheduled_at = $5, next_try_at = $6, last_error = $7,
                 updated_at = $8, lease_expires_at = NULL
             WHERE id = $9",
        )
        .bind(job.status.as_str())
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.priority)
        .bind(job.scheduled_at)
        .bind(job.next_try_at)
        .bind(&job.last_error)
        .bind(Utc::now())
        .bind(job.id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, job: &Job, reason: DeadLetterReason) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let deleted = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job.id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await.map_err(Error::Database)?;
            return Err(Error::NotFound(format!("job {}", job.id)));
        }

        sqlx::query(
            "INSERT INTO dead_letter_jobs (id, job_id, job_type, payload, attempts, last_error, reason, failed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::now_v7())
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(reason.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterJob>> {
        let rows = sqlx::query(
            "SELECT id, job_id, job_type, payload, attempts, last_error, reason, failed_at
             FROM dead_letter_jobs
             ORDER BY failed_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_dead_letter_row).collect()
    }
}
