use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prospector_model::LlmBudget;
use sqlx::{PgPool, postgres::PgRow};

use super::column;
use crate::{error::Result, persistence::BudgetLedger};

const BUDGET_COLUMNS: &str =
    "provider, daily_budget, used_today, period_budget, used_period, \
     last_reset_at";

#[derive(Debug, Clone)]
pub struct PostgresBudgetLedger {
    pool: PgPool,
}

impl PostgresBudgetLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<LlmBudget> {
        Ok(LlmBudget {
            provider: column(row, "provider")?,
            daily_budget: column(row, "daily_budget")?,
            used_today: column(row, "used_today")?,
            period_budget: column(row, "period_budget")?,
            used_period: column(row, "used_period")?,
            last_reset_at: column(row, "last_reset_at")?,
        })
    }
}

#[async_trait]
impl BudgetLedger for PostgresBudgetLedger {
    async fn get(&self, provider: &str) -> Result<Option<LlmBudget>> {
        let sql =
            format!("SELECT {BUDGET_COLUMNS} FROM llm_budgets WHERE provider = $1");
        let row = sqlx::query(&sql)
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self) -> Result<Vec<LlmBudget>> {
        let sql =
            format!("SELECT {BUDGET_COLUMNS} FROM llm_budgets ORDER BY provider");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn upsert_limits(
        &self,
        provider: &str,
        daily_budget: f64,
        period_budget: f64,
    ) -> Result<LlmBudget> {
        let sql = format!(
            r#"
            INSERT INTO llm_budgets (provider, daily_budget, period_budget)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider) DO UPDATE SET
                daily_budget = EXCLUDED.daily_budget,
                period_budget = EXCLUDED.period_budget
            RETURNING {BUDGET_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(provider)
            .bind(daily_budget)
            .bind(period_budget)
            .fetch_one(&self.pool)
            .await?;
        Self::map_row(&row)
    }

    async fn charge(
        &self,
        provider: &str,
        cost: f64,
    ) -> Result<Option<LlmBudget>> {
        let sql = format!(
            r#"
            UPDATE llm_budgets SET
                used_today = used_today + $2,
                used_period = used_period + $2
            WHERE provider = $1
            RETURNING {BUDGET_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(provider)
            .bind(cost)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn reset_daily(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {BUDGET_COLUMNS} FROM llm_budgets \
             ORDER BY provider FOR UPDATE"
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *tx).await?;

        let mut reset = Vec::new();
        for row in &rows {
            let mut budget = Self::map_row(row)?;
            if !budget.apply_daily_reset(now) {
                continue;
            }
            sqlx::query(
                r#"
                UPDATE llm_budgets SET
                    used_today = $2,
                    used_period = $3,
                    last_reset_at = $4
                WHERE provider = $1
                "#,
            )
            .bind(&budget.provider)
            .bind(budget.used_today)
            .bind(budget.used_period)
            .bind(budget.last_reset_at)
            .execute(&mut *tx)
            .await?;
            reset.push(budget.provider);
        }
        tx.commit().await?;
        Ok(reset)
    }
}
