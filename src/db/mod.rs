pub mod job_repository;
pub mod organization_repository;
pub mod plan_repository;
pub mod usage_repository;
pub mod webhook_event_repository;

pub mod postgres_job_repository;
pub mod postgres_organization_repository;
pub mod postgres_plan_repository;
pub mod postgres_usage_repository;
pub mod postgres_webhook_event_repository;

#[cfg(test)]
pub mod mock_db;
#[cfg(test)]
pub mod mock_webhook_event_repository;
