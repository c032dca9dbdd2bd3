use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use super::job_repository::JobRepository;
use super::organization_repository::{Downgrade, OrganizationRepository};
use super::plan_repository::PlanRepository;
use super::usage_repository::UsageRepository;
use crate::models::job::{Job, JobStatus, JobTransition, NewJob};
use crate::models::organization::{BillingStatus, Organization, SubscriptionUpdate};
use crate::models::plan::Plan;
use crate::models::usage::DebitOutcome;
use crate::utils::billing_period::BillingPeriod;

pub fn default_plans() -> Vec<Plan> {
    vec![
        Plan {
            code: "free".into(),
            name: "Free".into(),
            monthly_quota: 10,
        },
        Plan {
            code: "starter".into(),
            name: "Starter".into(),
            monthly_quota: 200,
        },
        Plan {
            code: "pro".into(),
            name: "Pro".into(),
            monthly_quota: 1000,
        },
    ]
}

pub fn test_organization(plan_code: &str) -> Organization {
    let now = OffsetDateTime::now_utc();
    Organization {
        id: Uuid::new_v4(),
        name: "Acme".into(),
        plan_code: plan_code.into(),
        quota_limit: None,
        billing_status: BillingStatus::Active,
        provider_customer_id: None,
        provider_subscription_id: None,
        current_period_end: None,
        canceled_at: None,
        last_billing_event_at: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
struct MockState {
    organizations: HashMap<Uuid, Organization>,
    usage: HashMap<(Uuid, String), i64>,
    jobs: HashMap<Uuid, Job>,
    /// Organizations whose writes fail with a store error.
    failing: HashSet<Uuid>,
    /// Organizations whose downgrade write never returns.
    stalled: HashSet<Uuid>,
    /// Organizations modified by a concurrent writer right before the downgrade lands.
    raced: HashSet<Uuid>,
    /// Organizations the reconciler downgrades between a billing handler's read and its write.
    downgraded_mid_update: HashSet<Uuid>,
    fail_debits: bool,
    debit_calls: usize,
}

/// In-memory store backing the organization, usage, job and plan repositories in tests.
/// The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct MockDb {
    state: Arc<Mutex<MockState>>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_organization(&self, organization: Organization) {
        self.state
            .lock()
            .unwrap()
            .organizations
            .insert(organization.id, organization);
    }

    pub fn organization(&self, id: Uuid) -> Option<Organization> {
        self.state.lock().unwrap().organizations.get(&id).cloned()
    }

    pub fn set_usage(&self, organization_id: Uuid, period: BillingPeriod, used: i64) {
        self.state
            .lock()
            .unwrap()
            .usage
            .insert((organization_id, period.to_string()), used);
    }

    pub fn usage(&self, organization_id: Uuid, period: BillingPeriod) -> i64 {
        self.state
            .lock()
            .unwrap()
            .usage
            .get(&(organization_id, period.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.values().cloned().collect()
    }

    pub fn fail_organization(&self, id: Uuid) {
        self.state.lock().unwrap().failing.insert(id);
    }

    pub fn stall_organization(&self, id: Uuid) {
        self.state.lock().unwrap().stalled.insert(id);
    }

    pub fn race_downgrade(&self, id: Uuid) {
        self.state.lock().unwrap().raced.insert(id);
    }

    pub fn downgrade_before_subscription_update(&self, id: Uuid) {
        self.state.lock().unwrap().downgraded_mid_update.insert(id);
    }

    pub fn fail_debits(&self, fail: bool) {
        self.state.lock().unwrap().fail_debits = fail;
    }

    pub fn debit_calls(&self) -> usize {
        self.state.lock().unwrap().debit_calls
    }
}

fn mock_failure() -> sqlx::Error {
    sqlx::Error::Protocol("Mock DB failure".into())
}

#[async_trait]
impl OrganizationRepository for MockDb {
    async fn find_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error> {
        Ok(self.organization(organization_id))
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .organizations
            .values()
            .find(|o| o.provider_subscription_id.as_deref() == Some(subscription_id))
            .cloned())
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .organizations
            .values()
            .find(|o| o.provider_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn list_downgrade_candidates(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Organization>, sqlx::Error> {
        let state = self.state.lock().unwrap();
        let mut candidates: Vec<Organization> = state
            .organizations
            .values()
            .filter(|o| o.is_downgrade_candidate(now))
            .cloned()
            .collect();
        candidates.sort_by_key(|o| (o.current_period_end, o.id));
        Ok(candidates)
    }

    async fn downgrade_if_unchanged(
        &self,
        organization_id: Uuid,
        expected_version: i64,
        downgrade: &Downgrade,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let stalled = self.state.lock().unwrap().stalled.contains(&organization_id);
        if stalled {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&organization_id) {
            return Err(mock_failure());
        }
        let raced = state.raced.remove(&organization_id);
        let Some(org) = state.organizations.get_mut(&organization_id) else {
            return Ok(false);
        };
        if raced {
            // Customer re-subscribed between the candidate scan and this write.
            org.billing_status = BillingStatus::Active;
            org.canceled_at = None;
            org.current_period_end = Some(now + time::Duration::days(30));
            org.version += 1;
        }
        if org.version != expected_version
            || org.billing_status == BillingStatus::CanceledDowngraded
        {
            return Ok(false);
        }
        org.plan_code = downgrade.plan_code.clone();
        org.quota_limit = Some(downgrade.quota_limit);
        org.billing_status = BillingStatus::CanceledDowngraded;
        org.version += 1;
        org.updated_at = now;
        Ok(true)
    }

    async fn apply_subscription_update(
        &self,
        organization_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&organization_id) {
            return Err(mock_failure());
        }
        let downgraded = state.downgraded_mid_update.remove(&organization_id);
        let Some(org) = state.organizations.get_mut(&organization_id) else {
            return Ok(false);
        };
        if downgraded {
            org.plan_code = "free".into();
            org.quota_limit = Some(10);
            org.billing_status = BillingStatus::CanceledDowngraded;
            org.version += 1;
        }
        if org
            .last_billing_event_at
            .is_some_and(|applied| applied > update.event_at)
        {
            return Ok(false);
        }
        if !(org.billing_status == BillingStatus::CanceledDowngraded && update.status.is_lapsed()) {
            org.billing_status = update.status;
        }
        if let Some((code, quota)) = &update.plan {
            org.plan_code = code.clone();
            org.quota_limit = Some(*quota);
        }
        if let Some(customer) = &update.provider_customer_id {
            org.provider_customer_id = Some(customer.clone());
        }
        org.provider_subscription_id = Some(update.provider_subscription_id.clone());
        org.current_period_end = update.current_period_end;
        org.canceled_at = update.canceled_at;
        org.last_billing_event_at = Some(update.event_at);
        org.version += 1;
        org.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }
}

#[async_trait]
impl UsageRepository for MockDb {
    async fn get_usage(
        &self,
        organization_id: Uuid,
        period: BillingPeriod,
    ) -> Result<i64, sqlx::Error> {
        Ok(self.usage(organization_id, period))
    }

    async fn try_debit(
        &self,
        organization_id: Uuid,
        period: BillingPeriod,
        amount: u32,
        limit: i64,
    ) -> Result<DebitOutcome, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        state.debit_calls += 1;
        if state.fail_debits {
            return Err(mock_failure());
        }
        let used = state
            .usage
            .entry((organization_id, period.to_string()))
            .or_insert(0);
        let next = *used + i64::from(amount);
        if limit > 0 && next <= limit {
            *used = next;
            Ok(DebitOutcome {
                admitted: true,
                used_after: next,
            })
        } else {
            Ok(DebitOutcome {
                admitted: false,
                used_after: *used,
            })
        }
    }
}

#[async_trait]
impl JobRepository for MockDb {
    async fn create_job(&self, job: &NewJob) -> Result<Job, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let created = Job {
            id: Uuid::new_v4(),
            organization_id: job.organization_id,
            status: JobStatus::Pending,
            keyword: job.keyword.clone(),
            result_limit: job.result_limit,
            quota_debit: job.quota_debit,
            period: job.period.clone(),
            external_run_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.state
            .lock()
            .unwrap()
            .jobs
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_job(
        &self,
        organization_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<Job>, sqlx::Error> {
        Ok(self
            .job(job_id)
            .filter(|job| job.organization_id == organization_id))
    }

    async fn mark_job_queued(
        &self,
        job_id: Uuid,
        external_run_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Queued;
                job.external_run_id = Some(external_run_id.to_string());
                job.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        completed_at: OffsetDateTime,
    ) -> Result<JobTransition, sqlx::Error> {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(JobTransition::NotFound);
        };
        if job.status.is_terminal() {
            return Ok(JobTransition::AlreadyTerminal);
        }
        job.status = status;
        job.error = error.map(str::to_string);
        job.completed_at = Some(completed_at);
        job.updated_at = OffsetDateTime::now_utc();
        Ok(JobTransition::Transitioned)
    }
}

#[async_trait]
impl PlanRepository for MockDb {
    async fn list_plans(&self) -> Result<Vec<Plan>, sqlx::Error> {
        Ok(default_plans())
    }
}
