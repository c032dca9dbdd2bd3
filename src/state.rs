use std::sync::Arc;

use crate::config::Config;
use crate::db::{
    job_repository::JobRepository, organization_repository::OrganizationRepository,
    usage_repository::UsageRepository, webhook_event_repository::WebhookEventRepository,
};
use crate::services::job_runner::JobRunner;
use crate::utils::plan_limits::PlanCatalog;

#[derive(Clone)]
pub struct AppState {
    pub organizations: Arc<dyn OrganizationRepository>,
    pub usage: Arc<dyn UsageRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub plans: Arc<PlanCatalog>,
    pub job_runner: Arc<dyn JobRunner>,
    pub config: Arc<Config>,
}
