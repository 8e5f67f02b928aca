//! Provider spend gate applied before launch, and the quota snapshot kept on
//! the orchestrator state.

use prospector_model::LlmBudget;
use serde_json::{Map, Value, json};

use super::config::CostClassPolicy;

pub const REASON_BUDGET_EXCEEDED: &str = "budget exceeded";

#[derive(Clone, Debug, PartialEq)]
pub enum Admission {
    Admitted { provider: String, estimate: f64 },
    Denied { provider: String, reason: String },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Decide whether a launch of the given cost class fits the provider's
/// remaining budget. `reserved` is the estimate already held by RUNNING
/// jobs on the same provider whose cost has not been charged yet.
pub fn admit(
    budget: Option<&LlmBudget>,
    policy: &CostClassPolicy,
    reserved: f64,
) -> Admission {
    let provider = policy.provider.clone();
    let Some(budget) = budget else {
        return Admission::Denied {
            reason: format!("no budget configured for provider {provider}"),
            provider,
        };
    };
    let estimate = policy.estimated_cost_usd;
    let mut projected = budget.clone();
    projected.charge(reserved.max(0.0));
    if budget.used_today < budget.daily_budget
        && budget.used_period < budget.period_budget
        && projected.admits(estimate)
    {
        Admission::Admitted { provider, estimate }
    } else {
        Admission::Denied {
            provider,
            reason: REASON_BUDGET_EXCEEDED.to_string(),
        }
    }
}

/// `{provider: {dailyBudget, usedToday, remainingToday, ...}}`.
pub fn quota_snapshot(budgets: &[LlmBudget]) -> Value {
    let mut out = Map::new();
    for budget in budgets {
        out.insert(
            budget.provider.clone(),
            json!({
                "dailyBudget": budget.daily_budget,
                "usedToday": budget.used_today,
                "remainingToday": budget.remaining_today(),
                "periodBudget": budget.period_budget,
                "usedPeriod": budget.used_period,
                "remainingPeriod": budget.remaining_period(),
            }),
        );
    }
    Value::Object(out)
}
