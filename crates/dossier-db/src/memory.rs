//! In-process store with the same semantics as the Postgres repositories.
//!
//! Every trait operation takes one short critical section, so a claim is as
//! atomic here as `FOR UPDATE SKIP LOCKED` is in Postgres. Used by tests and
//! by single-process deployments that do not need durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use dossier_core::{
    defaults, AppliedBy, ContextRepository, ContextSnapshot, DeadLetterJob, DeadLetterReason,
    Error, HistoryEntry, Job, JobRepository, NewHistoryEntry, NewJob, PromptTemplate, Question,
    QuestionSink, Result, SchemaRecord, SchemaRepository, TemplateRepository,
};

#[derive(Debug)]
struct StoredJob {
    job: Job,
    lease_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, StoredJob>,
    dead_letters: Vec<DeadLetterJob>,
    contexts: HashMap<i64, ContextSnapshot>,
    history: Vec<HistoryEntry>,
    next_history_id: i64,
    schemas: BTreeMap<String, JsonValue>,
    templates: HashMap<(String, String), PromptTemplate>,
    questions: Vec<Question>,
    next_question_id: i64,
    failing_fetches: u32,
    failing_question_creates: u32,
}

impl State {
    /// Store `context` as the next version and record the minimal history row.
    fn write_current(&mut self, engineer_id: i64, context: &JsonValue, applied_by: AppliedBy) -> i32 {
        let now = Utc::now();
        let version = self
            .contexts
            .get(&engineer_id)
            .map_or(1, |current| current.version + 1);
        self.contexts.insert(
            engineer_id,
            ContextSnapshot {
                engineer_id,
                context: context.clone(),
                version,
                updated_at: now,
            },
        );

        self.next_history_id += 1;
        self.history.push(HistoryEntry {
            id: self.next_history_id,
            engineer_id,
            context: context.clone(),
            changes: None,
            conflicts: None,
            applied_by,
            version,
            created_at: now,
        });
        version
    }
}

/// Memory-backed implementation of every collaborator trait.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    lease: ChronoDuration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            lease: ChronoDuration::seconds(defaults::JOB_CLAIM_LEASE_SECS as i64),
        }
    }

    /// Override the claim lease.
    pub fn with_lease(mut self, lease: std::time::Duration) -> Self {
        self.lease = ChronoDuration::from_std(lease).unwrap_or(self.lease);
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    /// Make the next `n` claims fail as if the store were unreachable.
    pub fn fail_next_fetches(&self, n: u32) -> Result<()> {
        self.state()?.failing_fetches = n;
        Ok(())
    }

    /// Make the next `n` question writes fail.
    pub fn fail_next_question_creates(&self, n: u32) -> Result<()> {
        self.state()?.failing_question_creates = n;
        Ok(())
    }

    pub fn put_schema(&self, record: SchemaRecord) -> Result<()> {
        self.state()?.schemas.insert(record.version, record.schema);
        Ok(())
    }

    pub fn put_template(&self, template: PromptTemplate) -> Result<()> {
        self.state()?.templates.insert(
            (template.name.clone(), template.version.clone()),
            template,
        );
        Ok(())
    }

    /// Active jobs (not dead-lettered), in no particular order.
    pub fn jobs(&self) -> Result<Vec<Job>> {
        Ok(self.state()?.jobs.values().map(|s| s.job.clone()).collect())
    }

    /// Questions raised for an engineer, oldest first.
    pub fn questions(&self, engineer_id: i64) -> Result<Vec<Question>> {
        Ok(self
            .state()?
            .questions
            .iter()
            .filter(|q| q.engineer_id == engineer_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn enqueue(&self, new_job: NewJob) -> Result<Uuid> {
        let job = new_job.into_job(Uuid::now_v7(), Utc::now());
        let id = job.id;
        self.state()?.jobs.insert(
            id,
            StoredJob {
                job,
                lease_expires_at: None,
            },
        );
        Ok(id)
    }

    async fn fetch_next_eligible(&self) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut state = self.state()?;

        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(Error::Internal("job store unavailable".to_string()));
        }

        let next = state
            .jobs
            .values_mut()
            .filter(|s| s.job.is_eligible(now) && s.lease_expires_at.map_or(true, |l| l <= now))
            .min_by(|a, b| {
                (a.job.priority, a.job.scheduled_at, a.job.id)
                    .cmp(&(b.job.priority, b.job.scheduled_at, b.job.id))
            });

        Ok(next.map(|stored| {
            stored.lease_expires_at = Some(now + self.lease);
            stored.job.clone()
        }))
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut state = self.state()?;
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job.id)))?;

        stored.job = job.clone();
        stored.job.updated_at = Utc::now();
        stored.lease_expires_at = None;
        Ok(())
    }

    async fn move_to_dead_letter(&self, job: &Job, reason: DeadLetterReason) -> Result<()> {
        let mut state = self.state()?;
        if state.jobs.remove(&job.id).is_none() {
            return Err(Error::NotFound(format!("job {}", job.id)));
        }
        state.dead_letters.push(DeadLetterJob {
            id: Uuid::now_v7(),
            job_id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
            last_error: job.last_error.clone(),
            reason,
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.state()?.jobs.get(&id).map(|s| s.job.clone()))
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterJob>> {
        Ok(self.state()?.dead_letters.clone())
    }
}

#[async_trait]
impl ContextRepository for MemoryStore {
    async fn get_current(&self, engineer_id: i64) -> Result<Option<ContextSnapshot>> {
        Ok(self.state()?.contexts.get(&engineer_id).cloned())
    }

    async fn upsert_current(
        &self,
        engineer_id: i64,
        context: &JsonValue,
        applied_by: AppliedBy,
    ) -> Result<i32> {
        let mut state = self.state()?;
        Ok(state.write_current(engineer_id, context, applied_by))
    }

    async fn replace_current(
        &self,
        engineer_id: i64,
        expected_version: i32,
        context: &JsonValue,
        applied_by: AppliedBy,
    ) -> Result<i32> {
        let mut state = self.state()?;
        let actual = state.contexts.get(&engineer_id).map_or(0, |c| c.version);
        if actual != expected_version {
            return Err(Error::VersionConflict {
                engineer_id,
                expected: expected_version,
                actual,
            });
        }
        Ok(state.write_current(engineer_id, context, applied_by))
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<i64> {
        let mut state = self.state()?;
        state.next_history_id += 1;
        let id = state.next_history_id;
        state.history.push(HistoryEntry {
            id,
            engineer_id: entry.engineer_id,
            context: entry.context,
            changes: entry.changes,
            conflicts: entry.conflicts,
            applied_by: entry.applied_by,
            version: entry.version,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_history(&self, engineer_id: i64) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .state()?
            .history
            .iter()
            .rev()
            .filter(|h| h.engineer_id == engineer_id)
            .cloned()
            .collect())
    }

    async fn get_history_by_id(
        &self,
        engineer_id: i64,
        history_id: i64,
    ) -> Result<Option<HistoryEntry>> {
        Ok(self
            .state()?
            .history
            .iter()
            .find(|h| h.id == history_id && h.engineer_id == engineer_id)
            .cloned())
    }
}

#[async_trait]
impl SchemaRepository for MemoryStore {
    async fn list_all(&self) -> Result<Vec<SchemaRecord>> {
        Ok(self
            .state()?
            .schemas
            .iter()
            .map(|(version, schema)| SchemaRecord {
                version: version.clone(),
                schema: schema.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn get_by_name_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<PromptTemplate>> {
        Ok(self
            .state()?
            .templates
            .get(&(name.to_string(), version.to_string()))
            .cloned())
    }
}

#[async_trait]
impl QuestionSink for MemoryStore {
    async fn create(&self, engineer_id: i64, question: &str) -> Result<i64> {
        let mut state = self.state()?;
        if state.failing_question_creates > 0 {
            state.failing_question_creates -= 1;
            return Err(Error::Internal("question sink unavailable".to_string()));
        }
        state.next_question_id += 1;
        let id = state.next_question_id;
        state.questions.push(Question {
            id,
            engineer_id,
            question: question.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }
}
