//! Request and response types for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{JobSnapshot, JobStatus};

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    pub job_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
}

impl From<JobSnapshot> for StatusResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            status: snapshot.status,
            job_id: snapshot.job_id,
            started_at: snapshot.started_at,
            finished_at: snapshot.finished_at,
            return_code: snapshot.return_code,
        }
    }
}

/// Body of `POST /api/playbook/{playbook}/start`.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub variables: PlaybookVariables,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaybookVariables {
    #[serde(default)]
    pub extra_vars: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}
