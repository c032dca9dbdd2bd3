use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::organization::{Organization, SubscriptionUpdate};

/// Values written by a reconciler downgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downgrade {
    pub plan_code: String,
    pub quota_limit: i64,
}

#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    async fn find_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error>;

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error>;

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error>;

    /// Organizations whose subscription has lapsed as of `now` and that have not yet been
    /// downgraded.
    async fn list_downgrade_candidates(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Organization>, sqlx::Error>;

    /// Moves the organization to the free tier only if its `version` still equals
    /// `expected_version`. Returns `false` when another writer got there first.
    async fn downgrade_if_unchanged(
        &self,
        organization_id: Uuid,
        expected_version: i64,
        downgrade: &Downgrade,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error>;

    /// Applies billing fields from a subscription event unless a newer event has already been
    /// applied. Returns `false` for a stale event.
    async fn apply_subscription_update(
        &self,
        organization_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<bool, sqlx::Error>;
}
