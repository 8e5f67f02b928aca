use chrono::{DateTime, Datelike, Utc};

/// Per-provider spend caps and running usage.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LlmBudget {
    pub provider: String,
    pub daily_budget: f64,
    pub used_today: f64,
    pub period_budget: f64,
    pub used_period: f64,
    pub last_reset_at: Option<DateTime<Utc>>,
}

impl LlmBudget {
    pub fn new(
        provider: impl Into<String>,
        daily_budget: f64,
        period_budget: f64,
    ) -> Self {
        Self {
            provider: provider.into(),
            daily_budget,
            used_today: 0.0,
            period_budget,
            used_period: 0.0,
            last_reset_at: None,
        }
    }

    pub fn remaining_today(&self) -> f64 {
        (self.daily_budget - self.used_today).max(0.0)
    }

    pub fn remaining_period(&self) -> f64 {
        (self.period_budget - self.used_period).max(0.0)
    }

    /// Launch gate: both windows still open and the estimate fits in both.
    pub fn admits(&self, estimate: f64) -> bool {
        self.used_today < self.daily_budget
            && self.used_period < self.period_budget
            && self.used_today + estimate <= self.daily_budget
            && self.used_period + estimate <= self.period_budget
    }

    pub fn charge(&mut self, cost: f64) {
        self.used_today += cost;
        self.used_period += cost;
    }

    /// Whether the daily window was already reset on `now`'s UTC day.
    pub fn reset_today(&self, now: DateTime<Utc>) -> bool {
        self.last_reset_at
            .is_some_and(|at| at.date_naive() == now.date_naive())
    }

    /// Zero the daily counter, and the period counter on a month change.
    /// Returns false without touching the row when it was already reset
    /// today.
    pub fn apply_daily_reset(&mut self, now: DateTime<Utc>) -> bool {
        if self.reset_today(now) {
            return false;
        }
        let new_period = self.last_reset_at.is_none_or(|at| {
            (at.year(), at.month()) != (now.year(), now.month())
        });
        self.used_today = 0.0;
        if new_period {
            self.used_period = 0.0;
        }
        self.last_reset_at = Some(now);
        true
    }
}
