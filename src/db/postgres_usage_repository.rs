use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::usage::DebitOutcome;
use crate::utils::billing_period::BillingPeriod;

use super::usage_repository::UsageRepository;

pub struct PostgresUsageRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UsageRepository for PostgresUsageRepository {
    async fn get_usage(
        &self,
        organization_id: Uuid,
        period: BillingPeriod,
    ) -> Result<i64, sqlx::Error> {
        let used = sqlx::query_scalar::<_, i64>(
            "SELECT used FROM usage_counters WHERE organization_id = $1 AND period = $2",
        )
        .bind(organization_id)
        .bind(period.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(used.unwrap_or(0))
    }

    async fn try_debit(
        &self,
        organization_id: Uuid,
        period: BillingPeriod,
        amount: u32,
        limit: i64,
    ) -> Result<DebitOutcome, sqlx::Error> {
        let period = period.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO usage_counters (organization_id, period, used, created_at, updated_at)
            VALUES ($1, $2, 0, now(), now())
            ON CONFLICT (organization_id, period) DO NOTHING
            "#,
        )
        .bind(organization_id)
        .bind(&period)
        .execute(&mut *tx)
        .await?;

        // The row lock taken by UPDATE serializes concurrent debits; Postgres re-checks the
        // WHERE clause against the latest row version before writing.
        let debited = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE usage_counters
            SET used = used + $3, updated_at = now()
            WHERE organization_id = $1
              AND period = $2
              AND $4 > 0
              AND used + $3 <= $4
            RETURNING used
            "#,
        )
        .bind(organization_id)
        .bind(&period)
        .bind(i64::from(amount))
        .bind(limit)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match debited {
            Some(used_after) => DebitOutcome {
                admitted: true,
                used_after,
            },
            None => {
                let used_after = sqlx::query_scalar::<_, i64>(
                    "SELECT used FROM usage_counters WHERE organization_id = $1 AND period = $2",
                )
                .bind(organization_id)
                .bind(&period)
                .fetch_one(&mut *tx)
                .await?;
                DebitOutcome {
                    admitted: false,
                    used_after,
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
