use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineRunStatus::Running => "running",
            PipelineRunStatus::Completed => "completed",
            PipelineRunStatus::Failed => "failed",
            PipelineRunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunRow {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub jobs_discovered: i32,
    pub jobs_processed: i32,
    pub error_message: Option<String>,
}

/// Final bookkeeping written when a run leaves the `running` state.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRunUpdate {
    pub status: PipelineRunStatus,
    pub jobs_discovered: i32,
    pub jobs_processed: i32,
    pub error_message: Option<String>,
}
