//! Folds analysis results into an engineer's stored context.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use dossier_context::{diff_contexts, merge, MergeResult};
use dossier_core::defaults::CONTEXT_WRITE_MAX_ATTEMPTS;
use dossier_core::{
    AIResponse, AppliedBy, ChangeRecord, ContextRepository, Error, HistoryEntry,
    NewHistoryEntry, QuestionSink, Result,
};

/// What one `process` call persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// Version of the current document after the write.
    pub version: i32,
    /// Id of the detailed history entry, if it could be written.
    pub history_id: Option<i64>,
    pub changes: Vec<ChangeRecord>,
    pub conflicts: Vec<String>,
    /// Id of the clarification question raised for the conflicts, if any.
    pub question_id: Option<i64>,
}

/// Result of a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub version: i32,
    pub history_id: i64,
    pub changes: Vec<ChangeRecord>,
}

/// Merges AI output into the context store and raises clarification
/// questions on conflict.
pub struct ResponseProcessor {
    contexts: Arc<dyn ContextRepository>,
    questions: Arc<dyn QuestionSink>,
}

impl ResponseProcessor {
    pub fn new(contexts: Arc<dyn ContextRepository>, questions: Arc<dyn QuestionSink>) -> Self {
        Self {
            contexts,
            questions,
        }
    }

    /// Merge `response` into the engineer's document and persist the result.
    ///
    /// The current document and its minimal history row are written first,
    /// conditional on the version that was merged against; a concurrent
    /// writer causes a fresh read and merge. The detailed history entry and
    /// the clarification question are written afterwards; failures there are
    /// logged and do not fail the call.
    #[instrument(skip(self, response), fields(subsystem = "context", component = "processor", op = "process"))]
    pub async fn process(&self, engineer_id: i64, response: &AIResponse) -> Result<ProcessOutcome> {
        let start = Instant::now();
        let (version, result): (i32, MergeResult) = self
            .write_current(engineer_id, AppliedBy::Ai, |existing| {
                let result = merge(existing, response)?;
                Ok((result.merged.clone(), result))
            })
            .await?;

        let history_id = match self
            .contexts
            .append_history(NewHistoryEntry {
                engineer_id,
                context: result.merged.clone(),
                changes: Some(result.changes.clone()),
                conflicts: (!result.conflicts.is_empty()).then(|| result.conflicts.clone()),
                applied_by: AppliedBy::Ai,
                version,
            })
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, version, "Failed to record detailed history entry");
                None
            }
        };

        let question_id = if result.has_conflicts() {
            let text = conflict_question(&result.conflicts);
            match self.questions.create(engineer_id, &text).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, conflicts = result.conflicts.len(), "Failed to raise clarification question");
                    None
                }
            }
        } else {
            None
        };

        info!(
            version,
            changes = result.changes.len(),
            conflicts = result.conflicts.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Context updated"
        );

        Ok(ProcessOutcome {
            version,
            history_id,
            changes: result.changes,
            conflicts: result.conflicts,
            question_id,
        })
    }

    /// Re-apply a historical snapshot as a new version.
    #[instrument(skip(self), fields(subsystem = "context", component = "processor", op = "rollback"))]
    pub async fn rollback(&self, engineer_id: i64, history_id: i64) -> Result<RollbackOutcome> {
        let entry = self
            .contexts
            .get_history_by_id(engineer_id, history_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "history entry {} for engineer {}",
                    history_id, engineer_id
                ))
            })?;

        let (version, changes) = self
            .write_current(engineer_id, AppliedBy::Rollback, |current| {
                Ok((entry.context.clone(), diff_contexts(current, &entry.context)?))
            })
            .await?;
        let new_history_id = self
            .contexts
            .append_history(NewHistoryEntry {
                engineer_id,
                context: entry.context,
                changes: Some(changes.clone()),
                conflicts: None,
                applied_by: AppliedBy::Rollback,
                version,
            })
            .await?;

        info!(
            restored_version = entry.version,
            version,
            changes = changes.len(),
            "Context rolled back"
        );

        Ok(RollbackOutcome {
            version,
            history_id: new_history_id,
            changes,
        })
    }

    /// History of an engineer, newest first.
    pub async fn history(&self, engineer_id: i64) -> Result<Vec<HistoryEntry>> {
        self.contexts.get_history(engineer_id).await
    }

    /// Read the current document, derive the replacement with `build`, and
    /// store it only if nobody wrote in between. Retries on a lost race up to
    /// `CONTEXT_WRITE_MAX_ATTEMPTS` times, then surfaces the conflict so the
    /// job is retried later.
    async fn write_current<T, F>(
        &self,
        engineer_id: i64,
        applied_by: AppliedBy,
        mut build: F,
    ) -> Result<(i32, T)>
    where
        F: FnMut(&JsonValue) -> Result<(JsonValue, T)>,
    {
        let mut attempt = 1;
        loop {
            let (expected, current) = match self.contexts.get_current(engineer_id).await? {
                Some(snapshot) => (snapshot.version, snapshot.context),
                None => (0, JsonValue::Null),
            };
            let (document, derived) = build(&current)?;

            match self
                .contexts
                .replace_current(engineer_id, expected, &document, applied_by)
                .await
            {
                Ok(version) => return Ok((version, derived)),
                Err(e) if e.is_version_conflict() && attempt < CONTEXT_WRITE_MAX_ATTEMPTS => {
                    debug!(attempt, error = %e, "Context changed underneath, merging again");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// One question summarizing every conflict of a merge.
pub fn conflict_question(conflicts: &[String]) -> String {
    format!(
        "I detected {} potential conflict{} in your context: {}. Please confirm or clarify.",
        conflicts.len(),
        if conflicts.len() == 1 { "" } else { "s" },
        conflicts.join("; ")
    )
}
