use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Generation, JobId, JobStage, PartialResult};

/// `POST /jobs` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub prompt: String,
    pub wallet_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

/// Job state as reported by the backend, both from `GET /jobs/{id}` and on the push topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub job_id: JobId,
    pub stage: JobStage,
    #[serde(flatten)]
    pub partial: PartialResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn into_event(self, generation: Generation) -> StatusEvent {
        let error = match self.stage {
            JobStage::Failed => Some(StatusError::Backend(
                self.error
                    .unwrap_or_else(|| "backend reported failure without a reason".to_string()),
            )),
            _ => None,
        };
        StatusEvent {
            job_id: self.job_id,
            generation,
            stage: self.stage,
            partial_result: (!self.partial.is_empty()).then_some(self.partial),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// The backend itself declared the job failed.
    Backend(String),
    /// The client could no longer reach the status transport.
    Transport(String),
}

/// A status update tagged with the generation of the subscription that delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub job_id: JobId,
    pub generation: Generation,
    pub stage: JobStage,
    pub partial_result: Option<PartialResult>,
    pub error: Option<StatusError>,
}

impl StatusEvent {
    pub fn stage(job_id: JobId, generation: Generation, stage: JobStage) -> Self {
        Self {
            job_id,
            generation,
            stage,
            partial_result: None,
            error: None,
        }
    }

    pub fn transport_failure(
        job_id: JobId,
        generation: Generation,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            generation,
            stage: JobStage::Failed,
            partial_result: None,
            error: Some(StatusError::Transport(reason.into())),
        }
    }

    pub fn with_partial(mut self, partial: PartialResult) -> Self {
        self.partial_result = Some(partial);
        self
    }
}
