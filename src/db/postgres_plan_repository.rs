use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::plan::Plan;

use super::plan_repository::PlanRepository;

pub struct PostgresPlanRepository {
    pub pool: PgPool,
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn list_plans(&self) -> Result<Vec<Plan>, sqlx::Error> {
        sqlx::query_as::<_, Plan>("SELECT code, name, monthly_quota FROM plans ORDER BY monthly_quota ASC")
            .fetch_all(&self.pool)
            .await
    }
}
