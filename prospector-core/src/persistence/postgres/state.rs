use async_trait::async_trait;
use prospector_model::{ORCHESTRATOR_STATE_ID, OrchestratorState};
use sqlx::{PgPool, postgres::PgRow};

use super::{column, counter, to_db_counter};
use crate::{
    error::{OrchestratorError, Result},
    persistence::StateStore,
};

const STATE_COLUMNS: &str = "is_full_spectrum_enabled, last_contrarian_at, \
    last_sentiment_at, last_deep_reasoning_at, contrarian_backpressure, \
    sentiment_backpressure, deep_reasoning_backpressure, total_jobs_today, \
    total_cost_today, provider_quota_json, last_daily_reset_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<OrchestratorState> {
        Ok(OrchestratorState {
            is_full_spectrum_enabled: column(row, "is_full_spectrum_enabled")?,
            last_contrarian_at: column(row, "last_contrarian_at")?,
            last_sentiment_at: column(row, "last_sentiment_at")?,
            last_deep_reasoning_at: column(row, "last_deep_reasoning_at")?,
            contrarian_backpressure: counter(row, "contrarian_backpressure")?,
            sentiment_backpressure: counter(row, "sentiment_backpressure")?,
            deep_reasoning_backpressure: counter(
                row,
                "deep_reasoning_backpressure",
            )?,
            total_jobs_today: counter(row, "total_jobs_today")?,
            total_cost_today: column(row, "total_cost_today")?,
            provider_quota_json: column(row, "provider_quota_json")?,
            last_daily_reset_at: column(row, "last_daily_reset_at")?,
            updated_at: column(row, "updated_at")?,
        })
    }

    async fn write(
        &self,
        state: &OrchestratorState,
        overwrite: bool,
    ) -> Result<u64> {
        let conflict = if overwrite {
            "DO UPDATE SET \
                is_full_spectrum_enabled = EXCLUDED.is_full_spectrum_enabled, \
                last_contrarian_at = EXCLUDED.last_contrarian_at, \
                last_sentiment_at = EXCLUDED.last_sentiment_at, \
                last_deep_reasoning_at = EXCLUDED.last_deep_reasoning_at, \
                contrarian_backpressure = EXCLUDED.contrarian_backpressure, \
                sentiment_backpressure = EXCLUDED.sentiment_backpressure, \
                deep_reasoning_backpressure = \
                    EXCLUDED.deep_reasoning_backpressure, \
                total_jobs_today = EXCLUDED.total_jobs_today, \
                total_cost_today = EXCLUDED.total_cost_today, \
                provider_quota_json = EXCLUDED.provider_quota_json, \
                last_daily_reset_at = EXCLUDED.last_daily_reset_at, \
                updated_at = EXCLUDED.updated_at"
        } else {
            "DO NOTHING"
        };
        let sql = format!(
            "INSERT INTO orchestrator_state (id, {STATE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) {conflict}"
        );
        let done = sqlx::query(&sql)
            .bind(ORCHESTRATOR_STATE_ID)
            .bind(state.is_full_spectrum_enabled)
            .bind(state.last_contrarian_at)
            .bind(state.last_sentiment_at)
            .bind(state.last_deep_reasoning_at)
            .bind(to_db_counter(state.contrarian_backpressure))
            .bind(to_db_counter(state.sentiment_backpressure))
            .bind(to_db_counter(state.deep_reasoning_backpressure))
            .bind(to_db_counter(state.total_jobs_today))
            .bind(state.total_cost_today)
            .bind(&state.provider_quota_json)
            .bind(state.last_daily_reset_at)
            .bind(state.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn load(&self) -> Result<Option<OrchestratorState>> {
        let sql =
            format!("SELECT {STATE_COLUMNS} FROM orchestrator_state WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(ORCHESTRATOR_STATE_ID)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn init_if_absent(
        &self,
        initial: OrchestratorState,
    ) -> Result<OrchestratorState> {
        self.write(&initial, false).await?;
        self.load().await?.ok_or_else(|| {
            OrchestratorError::Internal(
                "orchestrator state missing after initialisation".into(),
            )
        })
    }

    async fn save(&self, state: &OrchestratorState) -> Result<()> {
        self.write(state, true).await?;
        Ok(())
    }
}
