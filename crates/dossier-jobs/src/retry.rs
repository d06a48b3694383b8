//! Retry and dead-letter policy for failed jobs.

use std::time::Duration;

use chrono::{DateTime, Utc};

use dossier_core::{defaults, Job, JobStatus};

/// Exponential backoff: `2^attempts` seconds, capped at five minutes.
///
/// `attempts` is the count after the failure being handled.
pub fn backoff_duration(attempts: i32) -> Duration {
    if attempts <= 0 {
        return Duration::from_secs(defaults::JOB_RETRY_BASE_SECS);
    }
    let secs = 1u64
        .checked_shl(attempts as u32)
        .unwrap_or(u64::MAX)
        .min(defaults::JOB_RETRY_MAX_SECS);
    Duration::from_secs(secs)
}

/// What to do with a job whose handler just failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Persist as `retry`, eligible again at `next_try_at`.
    Retry { next_try_at: DateTime<Utc> },
    /// Budget exhausted; move to dead letters.
    DeadLetter,
}

/// Record a failed attempt on `job` and decide its fate.
///
/// Increments `attempts` and sets `last_error`. On retry the job's status and
/// `next_try_at` are updated; on dead-letter its status becomes `failed`.
pub fn record_failure(job: &mut Job, error: &str, now: DateTime<Utc>) -> FailureOutcome {
    job.attempts += 1;
    job.last_error = Some(error.to_string());
    job.updated_at = now;

    if job.attempts >= job.max_attempts {
        job.status = JobStatus::Failed;
        job.next_try_at = None;
        return FailureOutcome::DeadLetter;
    }

    let backoff = chrono::Duration::from_std(backoff_duration(job.attempts))
        .unwrap_or_else(|_| chrono::Duration::seconds(defaults::JOB_RETRY_MAX_SECS as i64));
    let next_try_at = now + backoff;
    job.status = JobStatus::Retry;
    job.next_try_at = Some(next_try_at);
    FailureOutcome::Retry { next_try_at }
}

/// Mark `job` as done.
pub fn record_success(job: &mut Job, now: DateTime<Utc>) {
    job.status = JobStatus::Done;
    job.next_try_at = None;
    job.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::NewJob;
    use uuid::Uuid;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_duration(0), Duration::from_secs(1));
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(3), Duration::from_secs(8));
        assert_eq!(backoff_duration(8), Duration::from_secs(256));
        assert_eq!(backoff_duration(9), Duration::from_secs(300));
        assert_eq!(backoff_duration(200), Duration::from_secs(300));
    }

    #[test]
    fn test_failures_until_dead_letter() {
        let now = Utc::now();
        let mut job = NewJob::new("t", vec![])
            .with_max_attempts(3)
            .into_job(Uuid::now_v7(), now);

        for expected in 1..3 {
            let outcome = record_failure(&mut job, "boom", now);
            assert_eq!(job.attempts, expected);
            assert_eq!(job.status, JobStatus::Retry);
            assert_eq!(
                outcome,
                FailureOutcome::Retry {
                    next_try_at: now + chrono::Duration::seconds(1 << expected)
                }
            );
        }

        assert_eq!(record_failure(&mut job, "last", now), FailureOutcome::DeadLetter);
        assert_eq!(job.attempts, job.max_attempts);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("last"));
    }

    #[test]
    fn test_single_attempt_job_dead_letters_immediately() {
        let now = Utc::now();
        let mut job = NewJob::new("t", vec![])
            .with_max_attempts(1)
            .into_job(Uuid::now_v7(), now);
        assert_eq!(record_failure(&mut job, "x", now), FailureOutcome::DeadLetter);
    }
}
