use serde::Serialize;
use time::OffsetDateTime;

use crate::utils::billing_period::BillingPeriod;

/// Result of a single atomic increment-and-check against the usage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebitOutcome {
    pub admitted: bool,
    /// Counter value after the operation; unchanged from before when not admitted.
    pub used_after: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub used: i64,
    pub limit: i64,
}

impl UsageSnapshot {
    pub fn remaining(&self) -> i64 {
        (self.limit - self.used).max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub plan: String,
    pub plan_name: String,
    pub used: i64,
    pub limit: i64,
    pub remaining: i64,
    pub period: BillingPeriod,
    #[serde(with = "time::serde::rfc3339")]
    pub resets_at: OffsetDateTime,
}
