use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::organization::{BillingStatus, Organization, SubscriptionUpdate};

use super::organization_repository::{Downgrade, OrganizationRepository};

const ORGANIZATION_COLUMNS: &str = r#"
    id, name, plan_code, quota_limit, billing_status, provider_customer_id,
    provider_subscription_id, current_period_end, canceled_at, last_billing_event_at,
    version, created_at, updated_at
"#;

pub struct PostgresOrganizationRepository {
    pub pool: PgPool,
}

#[async_trait]
impl OrganizationRepository for PostgresOrganizationRepository {
    async fn find_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1");
        sqlx::query_as::<_, Organization>(&sql)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let sql = format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE provider_subscription_id = $1 LIMIT 1"
        );
        sqlx::query_as::<_, Organization>(&sql)
            .bind(subscription_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Organization>, sqlx::Error> {
        let sql = format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE provider_customer_id = $1 LIMIT 1"
        );
        sqlx::query_as::<_, Organization>(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn list_downgrade_candidates(
        &self,
        now: OffsetDateTime,
    ) -> Result<Vec<Organization>, sqlx::Error> {
        // Mirrors Organization::is_downgrade_candidate.
        let sql = format!(
            r#"
            SELECT {ORGANIZATION_COLUMNS}
            FROM organizations
            WHERE billing_status <> 'canceled_downgraded'
              AND (
                billing_status IN ('canceled', 'incomplete_expired')
                OR (canceled_at IS NOT NULL AND current_period_end < $1)
                OR (current_period_end < $1 AND provider_subscription_id IS NOT NULL)
              )
            ORDER BY current_period_end ASC NULLS FIRST, id ASC
            "#
        );
        sqlx::query_as::<_, Organization>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
    }

    async fn downgrade_if_unchanged(
        &self,
        organization_id: Uuid,
        expected_version: i64,
        downgrade: &Downgrade,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            r#"
            UPDATE organizations
            SET plan_code = $3,
                quota_limit = $4,
                billing_status = $5,
                version = version + 1,
                updated_at = $6
            WHERE id = $1
              AND version = $2
              AND billing_status <> 'canceled_downgraded'
            "#,
        )
        .bind(organization_id)
        .bind(expected_version)
        .bind(&downgrade.plan_code)
        .bind(downgrade.quota_limit)
        .bind(BillingStatus::CanceledDowngraded)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn apply_subscription_update(
        &self,
        organization_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<bool, sqlx::Error> {
        let (plan_code, quota_limit) = match &update.plan {
            Some((code, quota)) => (Some(code.as_str()), Some(*quota)),
            None => (None, None),
        };
        let res = sqlx::query(
            r#"
            UPDATE organizations
            SET billing_status = CASE
                    WHEN billing_status = 'canceled_downgraded'
                         AND $2 IN ('canceled', 'incomplete_expired')
                    THEN billing_status
                    ELSE $2
                END,
                plan_code = COALESCE($3, plan_code),
                quota_limit = CASE WHEN $3::text IS NULL THEN quota_limit ELSE $4 END,
                provider_customer_id = COALESCE($5, provider_customer_id),
                provider_subscription_id = $6,
                current_period_end = $7,
                canceled_at = $8,
                last_billing_event_at = $9,
                version = version + 1,
                updated_at = now()
            WHERE id = $1
              AND (last_billing_event_at IS NULL OR last_billing_event_at <= $9)
            "#,
        )
        .bind(organization_id)
        .bind(update.status)
        .bind(plan_code)
        .bind(quota_limit)
        .bind(update.provider_customer_id.as_deref())
        .bind(&update.provider_subscription_id)
        .bind(update.current_period_end)
        .bind(update.canceled_at)
        .bind(update.event_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}
