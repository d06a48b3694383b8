//! ProcessResponseHandler: merges one analysis result into the context store.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

use dossier_core::{AIResponse, JobType};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::processor::ResponseProcessor;

/// Payload of an `ai.process_response` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponsePayload {
    pub engineer_id: i64,
    pub response: AIResponse,
}

pub struct ProcessResponseHandler {
    processor: Arc<ResponseProcessor>,
}

impl ProcessResponseHandler {
    pub fn new(processor: Arc<ResponseProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl JobHandler for ProcessResponseHandler {
    fn job_type(&self) -> JobType {
        JobType::ProcessResponse
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: ProcessResponsePayload = match ctx.payload() {
            Ok(p) => p,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        match self
            .processor
            .process(payload.engineer_id, &payload.response)
            .await
        {
            Ok(outcome) => match serde_json::to_value(&outcome) {
                Ok(value) => JobResult::Success(Some(value)),
                Err(e) => JobResult::Failed(format!("Failed to encode outcome: {}", e)),
            },
            Err(e) => {
                error!(
                    job_id = %ctx.job_id(),
                    engineer_id = payload.engineer_id,
                    error = %e,
                    "Response processing failed"
                );
                JobResult::Failed(format!("Response processing failed: {}", e))
            }
        }
    }
}
