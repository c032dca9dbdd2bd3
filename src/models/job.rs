use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "job_status")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Job {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub status: JobStatus,
    pub keyword: String,
    pub result_limit: i32,
    pub quota_debit: i64,
    pub period: String,
    pub external_run_id: Option<String>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub organization_id: Uuid,
    pub keyword: String,
    pub result_limit: i32,
    pub quota_debit: i64,
    pub period: String,
}

/// Outcome of moving a job into a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    Transitioned,
    AlreadyTerminal,
    NotFound,
}
