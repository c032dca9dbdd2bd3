use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus, NewJob};
use crate::models::usage::{QuotaStatus, UsageSnapshot};
use crate::services::job_runner::JobRunnerError;
use crate::state::AppState;
use crate::utils::billing_period::BillingPeriod;

/// Quota units charged per admitted job.
pub const JOB_COST: u32 = 1;
pub const MAX_KEYWORD_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub keyword: String,
    pub limit: i32,
}

#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    Accepted(Job),
    QuotaExceeded {
        used: i64,
        limit: i64,
        upgrade_url: String,
    },
    /// No organization resolves for the supplied id.
    Unauthenticated,
}

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("invalid job specification: {0}")]
    InvalidJobSpec(String),
    #[error("usage store unavailable: {0}")]
    Store(#[from] sqlx::Error),
    #[error("job submission failed: {0}")]
    Submission(#[from] JobRunnerError),
}

/// Trims and bounds-checks a job request, returning the keyword to store.
pub fn validate_job_request(
    request: &JobRequest,
    max_results_per_job: i32,
) -> Result<String, AdmissionError> {
    let keyword = request.keyword.trim();
    if keyword.is_empty() {
        return Err(AdmissionError::InvalidJobSpec("keyword is required".into()));
    }
    if keyword.chars().count() > MAX_KEYWORD_CHARS {
        return Err(AdmissionError::InvalidJobSpec(format!(
            "keyword must be at most {MAX_KEYWORD_CHARS} characters"
        )));
    }
    if request.limit < 1 || request.limit > max_results_per_job {
        return Err(AdmissionError::InvalidJobSpec(format!(
            "limit must be between 1 and {max_results_per_job}"
        )));
    }
    Ok(keyword.to_string())
}

pub async fn admit_job(
    state: &AppState,
    organization_id: Uuid,
    request: &JobRequest,
) -> Result<AdmissionDecision, AdmissionError> {
    admit_job_at(state, organization_id, request, OffsetDateTime::now_utc()).await
}

/// Admission decision for a job submitted at `now`. The quota is debited before the job is
/// handed to the runner and is not refunded if the submission fails.
pub async fn admit_job_at(
    state: &AppState,
    organization_id: Uuid,
    request: &JobRequest,
    now: OffsetDateTime,
) -> Result<AdmissionDecision, AdmissionError> {
    let Some(organization) = state.organizations.find_organization(organization_id).await? else {
        return Ok(AdmissionDecision::Unauthenticated);
    };

    let keyword = validate_job_request(request, state.config.max_results_per_job)?;

    let limit = state.plans.effective_limit(&organization);
    let period = BillingPeriod::containing(now);
    let debit = state
        .usage
        .try_debit(organization_id, period, JOB_COST, limit)
        .await?;

    if !debit.admitted {
        info!(
            %organization_id,
            %period,
            used = debit.used_after,
            limit,
            "job rejected: monthly quota exhausted"
        );
        return Ok(AdmissionDecision::QuotaExceeded {
            used: debit.used_after,
            limit,
            upgrade_url: state.config.upgrade_url.clone(),
        });
    }

    let mut job = state
        .jobs
        .create_job(&NewJob {
            organization_id,
            keyword,
            result_limit: request.limit,
            quota_debit: i64::from(JOB_COST),
            period: period.to_string(),
        })
        .await?;

    let run = match state.job_runner.submit(&job).await {
        Ok(run) => run,
        Err(err) => {
            warn!(?err, job_id = %job.id, %organization_id, "job runner rejected submission");
            let reason = format!("submission failed: {err}");
            if let Err(store_err) = state
                .jobs
                .finish_job(job.id, JobStatus::Failed, Some(&reason), now)
                .await
            {
                error!(?store_err, job_id = %job.id, "failed to mark unsubmitted job as failed");
            }
            return Err(AdmissionError::Submission(err));
        }
    };

    if state.jobs.mark_job_queued(job.id, &run.run_id).await? {
        job.status = JobStatus::Queued;
        job.external_run_id = Some(run.run_id);
    } else if let Some(current) = state.jobs.find_job(organization_id, job.id).await? {
        // A completion event beat us to it.
        job = current;
    }

    info!(
        %organization_id,
        job_id = %job.id,
        used = debit.used_after,
        limit,
        "job admitted"
    );
    Ok(AdmissionDecision::Accepted(job))
}

/// Current-period usage paired with the organization's effective limit.
pub async fn usage_snapshot(
    state: &AppState,
    organization_id: Uuid,
    period: BillingPeriod,
) -> Result<Option<UsageSnapshot>, sqlx::Error> {
    let Some(organization) = state.organizations.find_organization(organization_id).await? else {
        return Ok(None);
    };
    let used = state.usage.get_usage(organization_id, period).await?;
    Ok(Some(UsageSnapshot {
        used,
        limit: state.plans.effective_limit(&organization),
    }))
}

pub async fn quota_status(
    state: &AppState,
    organization_id: Uuid,
    now: OffsetDateTime,
) -> Result<Option<QuotaStatus>, sqlx::Error> {
    let Some(organization) = state.organizations.find_organization(organization_id).await? else {
        return Ok(None);
    };
    let period = BillingPeriod::containing(now);
    let used = state.usage.get_usage(organization_id, period).await?;
    let plan = state.plans.plan_for(&organization);
    let snapshot = UsageSnapshot {
        used,
        limit: state.plans.effective_limit(&organization),
    };

    Ok(Some(QuotaStatus {
        plan: plan.code.clone(),
        plan_name: plan.name.clone(),
        used: snapshot.used,
        limit: snapshot.limit,
        remaining: snapshot.remaining(),
        period,
        resets_at: period.resets_at(),
    }))
}
