use std::collections::HashMap;

use tracing::warn;

use crate::config::ConfigError;
use crate::models::{organization::Organization, plan::Plan};

pub fn normalize_plan_code(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Read-only plan reference data, loaded once at startup.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
    free: Plan,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>, free_plan_code: &str) -> Result<Self, ConfigError> {
        let plans: HashMap<String, Plan> = plans
            .into_iter()
            .map(|plan| (normalize_plan_code(&plan.code), plan))
            .collect();

        let free_code = normalize_plan_code(free_plan_code);
        let free = plans
            .get(&free_code)
            .cloned()
            .ok_or(ConfigError::MissingFreePlan(free_code))?;

        if let Some(plan) = plans.values().find(|plan| plan.monthly_quota < 0) {
            return Err(ConfigError::Invalid {
                key: "plans.monthly_quota",
                reason: format!("plan `{}` has a negative quota", plan.code),
            });
        }

        Ok(Self { plans, free })
    }

    pub fn get(&self, code: &str) -> Option<&Plan> {
        self.plans.get(&normalize_plan_code(code))
    }

    pub fn free_plan(&self) -> &Plan {
        &self.free
    }

    /// The plan an organization is billed under. An organization pointing at a plan code
    /// that is no longer in the catalog is treated as free.
    pub fn plan_for(&self, organization: &Organization) -> &Plan {
        match self.get(&organization.plan_code) {
            Some(plan) => plan,
            None => {
                warn!(
                    organization_id = %organization.id,
                    plan_code = %organization.plan_code,
                    "organization references unknown plan, falling back to free tier"
                );
                &self.free
            }
        }
    }

    /// Monthly quota for an organization: its own override when set, otherwise its plan's.
    pub fn effective_limit(&self, organization: &Organization) -> i64 {
        organization
            .quota_limit
            .unwrap_or_else(|| self.plan_for(organization).monthly_quota)
            .max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock_db::test_organization;

    fn plans() -> Vec<Plan> {
        vec![
            Plan {
                code: "free".into(),
                name: "Free".into(),
                monthly_quota: 10,
            },
            Plan {
                code: "Pro".into(),
                name: "Pro".into(),
                monthly_quota: 1000,
            },
        ]
    }

    #[test]
    fn missing_free_plan_is_a_configuration_error() {
        let err = PlanCatalog::new(plans(), "basic").unwrap_err();
        assert!(matches!(err, ConfigError::MissingFreePlan(code) if code == "basic"));
    }

    #[test]
    fn negative_quota_is_rejected() {
        let mut bad = plans();
        bad[1].monthly_quota = -1;
        assert!(matches!(
            PlanCatalog::new(bad, "free"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let catalog = PlanCatalog::new(plans(), " FREE ").unwrap();
        assert_eq!(catalog.free_plan().monthly_quota, 10);
        assert_eq!(catalog.get("pro").map(|p| p.monthly_quota), Some(1000));
        assert!(catalog.get("enterprise").is_none());
    }

    #[test]
    fn organization_override_wins_over_plan_quota() {
        let catalog = PlanCatalog::new(plans(), "free").unwrap();
        let mut org = test_organization("pro");
        assert_eq!(catalog.effective_limit(&org), 1000);

        org.quota_limit = Some(42);
        assert_eq!(catalog.effective_limit(&org), 42);

        org.quota_limit = None;
        org.plan_code = "retired".into();
        assert_eq!(catalog.effective_limit(&org), 10);
    }
}
