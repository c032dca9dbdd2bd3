use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, JobTransition, NewJob};

use super::job_repository::JobRepository;

pub struct PostgresJobRepository {
    pub pool: PgPool,
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn create_job(&self, job: &NewJob) -> Result<Job, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, organization_id, status, keyword, result_limit, quota_debit, period, created_at, updated_at)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, now(), now())
            RETURNING id, organization_id, status, keyword, result_limit, quota_debit, period,
                      external_run_id, error, created_at, updated_at, completed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.organization_id)
        .bind(&job.keyword)
        .bind(job.result_limit)
        .bind(job.quota_debit)
        .bind(&job.period)
        .fetch_one(&self.pool)
        .await
    }

    async fn find_job(
        &self,
        organization_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<Job>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, organization_id, status, keyword, result_limit, quota_debit, period,
                   external_run_id, error, created_at, updated_at, completed_at
            FROM jobs
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(job_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn mark_job_queued(
        &self,
        job_id: Uuid,
        external_run_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', external_run_id = $2, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(external_run_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        completed_at: OffsetDateTime,
    ) -> Result<JobTransition, sqlx::Error> {
        let updated = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE jobs
            SET status = $2, error = $3, completed_at = $4, updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'queued')
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(error)
        .bind(completed_at)
        .fetch_optional(&self.pool)
        .await?;
        if updated.is_some() {
            return Ok(JobTransition::Transitioned);
        }

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        Ok(if exists {
            JobTransition::AlreadyTerminal
        } else {
            JobTransition::NotFound
        })
    }
}
