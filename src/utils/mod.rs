pub mod billing_period;
pub mod plan_limits;
pub mod signature;
