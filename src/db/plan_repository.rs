use async_trait::async_trait;

use crate::models::plan::Plan;

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn list_plans(&self) -> Result<Vec<Plan>, sqlx::Error>;
}
