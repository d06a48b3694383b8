//! AnalyzeActivityHandler: runs inference for one activity and queues the
//! result for processing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use dossier_context::ContextDocument;
use dossier_core::{defaults, Activity, ContextRepository, JobRepository, JobType, Result};
use dossier_inference::InferenceEngine;

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::process_handler::ProcessResponsePayload;
use crate::worker::enqueue_json;

/// Payload of an `ai.analyze_activity` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeActivityPayload {
    pub engineer_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<i64>,
    pub activity: String,
}

impl From<AnalyzeActivityPayload> for Activity {
    fn from(payload: AnalyzeActivityPayload) -> Self {
        Activity {
            id: payload.activity_id,
            engineer_id: payload.engineer_id,
            text: payload.activity,
        }
    }
}

pub struct AnalyzeActivityHandler {
    engine: Arc<InferenceEngine>,
    contexts: Arc<dyn ContextRepository>,
    jobs: Arc<dyn JobRepository>,
}

impl AnalyzeActivityHandler {
    pub fn new(
        engine: Arc<InferenceEngine>,
        contexts: Arc<dyn ContextRepository>,
        jobs: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            engine,
            contexts,
            jobs,
        }
    }

    async fn context_text(&self, engineer_id: i64) -> Result<String> {
        match self.contexts.get_current(engineer_id).await? {
            Some(snapshot) => Ok(ContextDocument::from_value(&snapshot.context)?.to_prompt_text()),
            None => Ok(String::new()),
        }
    }
}

#[async_trait]
impl JobHandler for AnalyzeActivityHandler {
    fn job_type(&self) -> JobType {
        JobType::AnalyzeActivity
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: AnalyzeActivityPayload = match ctx.payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e.to_string()),
        };
        let engineer_id = payload.engineer_id;

        let context_text = match self.context_text(engineer_id).await {
            Ok(text) => text,
            Err(e) => return JobResult::Failed(format!("Failed to load context: {}", e)),
        };

        let activity = Activity::from(payload);
        let response = match self.engine.analyze_activity(&activity, &context_text).await {
            Ok(r) => r,
            Err(e) => {
                error!(job_id = %ctx.job_id(), engineer_id, error = %e, "Activity analysis failed");
                return JobResult::Failed(format!("Activity analysis failed: {}", e));
            }
        };
        let confidence = response.confidence;

        let next = ProcessResponsePayload {
            engineer_id,
            response,
        };
        let process_job_id = match enqueue_json(
            self.jobs.as_ref(),
            JobType::ProcessResponse,
            &next,
            defaults::JOB_PRIORITY,
            ctx.job.max_attempts,
        )
        .await
        {
            Ok(id) => id,
            Err(e) => return JobResult::Failed(format!("Failed to queue response processing: {}", e)),
        };

        info!(
            job_id = %ctx.job_id(),
            engineer_id,
            %process_job_id,
            confidence,
            "Activity analyzed, response queued"
        );

        JobResult::Success(Some(json!({
            "process_job_id": process_job_id,
            "confidence": confidence,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_into_activity() {
        let payload: AnalyzeActivityPayload = serde_json::from_str(
            r#"{"engineer_id": 42, "activity": "paired with Jane on deploy-svc"}"#,
        )
        .unwrap();
        let activity = Activity::from(payload);

        assert_eq!(activity.engineer_id, 42);
        assert_eq!(activity.id, None);
        assert_eq!(activity.text, "paired with Jane on deploy-svc");
    }
}
