use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "billing_status")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Active,
    Trialing,
    PastDue,
    Incomplete,
    IncompleteExpired,
    Unpaid,
    Canceled,
    /// Set by the reconciler once a lapsed organization has been moved to the free plan.
    CanceledDowngraded,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Active => "active",
            BillingStatus::Trialing => "trialing",
            BillingStatus::PastDue => "past_due",
            BillingStatus::Incomplete => "incomplete",
            BillingStatus::IncompleteExpired => "incomplete_expired",
            BillingStatus::Unpaid => "unpaid",
            BillingStatus::Canceled => "canceled",
            BillingStatus::CanceledDowngraded => "canceled_downgraded",
        }
    }

    /// Maps a subscription status string sent by the billing provider. The provider never
    /// sends `canceled_downgraded`; that marker only exists locally.
    pub fn from_provider(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(BillingStatus::Active),
            "trialing" => Some(BillingStatus::Trialing),
            "past_due" => Some(BillingStatus::PastDue),
            "incomplete" => Some(BillingStatus::Incomplete),
            "incomplete_expired" => Some(BillingStatus::IncompleteExpired),
            "unpaid" => Some(BillingStatus::Unpaid),
            "canceled" | "cancelled" => Some(BillingStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_lapsed(&self) -> bool {
        matches!(
            self,
            BillingStatus::Canceled | BillingStatus::IncompleteExpired
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub plan_code: String,
    pub quota_limit: Option<i64>,
    pub billing_status: BillingStatus,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub canceled_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_billing_event_at: Option<OffsetDateTime>,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Organization {
    /// Whether the reconciler should consider this organization for a downgrade at `now`.
    /// Kept in lockstep with `PostgresOrganizationRepository::list_downgrade_candidates`.
    pub fn is_downgrade_candidate(&self, now: OffsetDateTime) -> bool {
        if self.billing_status == BillingStatus::CanceledDowngraded {
            return false;
        }
        let period_over = self.current_period_end.is_some_and(|end| end < now);

        self.billing_status.is_lapsed()
            || (self.canceled_at.is_some() && period_over)
            || (period_over && self.provider_subscription_id.is_some())
    }
}

/// Billing fields carried by a subscription-change event, applied in one conditional write.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub status: BillingStatus,
    /// New plan and its monthly quota, when the event names a plan.
    pub plan: Option<(String, i64)>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: String,
    pub current_period_end: Option<OffsetDateTime>,
    pub canceled_at: Option<OffsetDateTime>,
    pub event_at: OffsetDateTime,
}
