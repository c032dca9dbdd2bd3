use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, JobTransition, NewJob};

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: &NewJob) -> Result<Job, sqlx::Error>;

    async fn find_job(
        &self,
        organization_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<Job>, sqlx::Error>;

    /// `pending -> queued`. A job that already reached a terminal state is left alone.
    async fn mark_job_queued(&self, job_id: Uuid, external_run_id: &str)
        -> Result<bool, sqlx::Error>;

    /// Moves a non-terminal job to `completed` or `failed`. Terminal jobs are never touched
    /// again, which makes redelivered completion events harmless.
    async fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        completed_at: OffsetDateTime,
    ) -> Result<JobTransition, sqlx::Error>;
}
