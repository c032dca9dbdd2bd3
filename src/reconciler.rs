use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::organization_repository::Downgrade;
use crate::models::organization::Organization;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOptions {
    #[serde(default)]
    pub dry_run: bool,
    /// Evaluation instant; defaults to the current time.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub now: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub candidates: usize,
    pub downgraded: usize,
    pub conflicts: usize,
    pub failures: usize,
    pub timed_out: usize,
    pub dry_run: bool,
    pub candidate_ids: Vec<Uuid>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list downgrade candidates: {0}")]
    Store(#[from] sqlx::Error),
}

/// Result of one candidate's conditional downgrade.
#[derive(Debug)]
pub enum DowngradeOutcome {
    Downgraded,
    /// The organization changed after it was read; left for the next run.
    Conflict,
    TimedOut,
    Failed(sqlx::Error),
}

/// Moves every organization whose subscription has lapsed to the free plan. Each candidate
/// is written independently; one failing or slow candidate never stops the sweep.
pub async fn run_reconciliation(
    state: &AppState,
    options: ReconcileOptions,
) -> Result<ReconcileReport, ReconcileError> {
    let now = options.now.unwrap_or_else(OffsetDateTime::now_utc);
    let candidates = state.organizations.list_downgrade_candidates(now).await?;

    let mut report = ReconcileReport {
        candidates: candidates.len(),
        dry_run: options.dry_run,
        candidate_ids: candidates.iter().map(|org| org.id).collect(),
        ..Default::default()
    };

    if options.dry_run {
        info!(candidates = report.candidates, %now, "reconciliation dry run");
        return Ok(report);
    }

    for organization in &candidates {
        match downgrade_candidate(state, organization, now).await {
            DowngradeOutcome::Downgraded => {
                info!(
                    organization_id = %organization.id,
                    previous_plan = %organization.plan_code,
                    previous_status = organization.billing_status.as_str(),
                    "organization downgraded to free plan"
                );
                report.downgraded += 1;
            }
            DowngradeOutcome::Conflict => {
                warn!(
                    organization_id = %organization.id,
                    version = organization.version,
                    "organization changed during reconciliation, skipping"
                );
                report.conflicts += 1;
            }
            DowngradeOutcome::TimedOut => {
                error!(organization_id = %organization.id, "downgrade timed out");
                report.timed_out += 1;
                report.failures += 1;
            }
            DowngradeOutcome::Failed(err) => {
                error!(?err, organization_id = %organization.id, "downgrade failed");
                report.failures += 1;
            }
        }
    }

    info!(
        candidates = report.candidates,
        downgraded = report.downgraded,
        conflicts = report.conflicts,
        failures = report.failures,
        "reconciliation finished"
    );
    Ok(report)
}

async fn downgrade_candidate(
    state: &AppState,
    organization: &Organization,
    now: OffsetDateTime,
) -> DowngradeOutcome {
    let free = state.plans.free_plan();
    let downgrade = Downgrade {
        plan_code: free.code.clone(),
        quota_limit: free.monthly_quota,
    };

    let write = state.organizations.downgrade_if_unchanged(
        organization.id,
        organization.version,
        &downgrade,
        now,
    );
    match tokio::time::timeout(state.config.reconcile_candidate_timeout, write).await {
        Err(_) => DowngradeOutcome::TimedOut,
        Ok(Err(err)) => DowngradeOutcome::Failed(err),
        Ok(Ok(true)) => DowngradeOutcome::Downgraded,
        Ok(Ok(false)) => DowngradeOutcome::Conflict,
    }
}
