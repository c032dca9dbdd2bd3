use async_trait::async_trait;
use uuid::Uuid;

use crate::models::usage::DebitOutcome;
use crate::utils::billing_period::BillingPeriod;

/// Durable per-organization, per-period usage counters.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Units consumed in `period`; zero when no counter row exists yet.
    async fn get_usage(
        &self,
        organization_id: Uuid,
        period: BillingPeriod,
    ) -> Result<i64, sqlx::Error>;

    /// Adds `amount` to the counter only if the result stays within `limit`, creating the
    /// counter at zero first when needed. Check and write happen in one atomic store
    /// operation; concurrent callers never both succeed past the limit.
    async fn try_debit(
        &self,
        organization_id: Uuid,
        period: BillingPeriod,
        amount: u32,
        limit: i64,
    ) -> Result<DebitOutcome, sqlx::Error>;
}
