use async_trait::async_trait;
use prospector_model::{JobId, JobStatus, ResearchJob};
use sqlx::{PgPool, postgres::PgRow};
use uuid::Uuid;

use super::{column, counter, to_db_counter};
use crate::{
    error::{OrchestratorError, Result},
    persistence::{JobFilter, JobStore},
};

const JOB_COLUMNS: &str = "id, mode, status, cost_class, priority, \
    scheduled_for, started_at, completed_at, retry_count, max_retries, \
    fingerprint_hash, deferred_reason, error_message, cost_usd, \
    input_tokens, output_tokens, candidates_created, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<ResearchJob> {
        let id: Uuid = column(row, "id")?;
        Ok(ResearchJob {
            id: JobId(id),
            mode: column::<String>(row, "mode")?.parse()?,
            status: column::<String>(row, "status")?.parse()?,
            cost_class: column::<String>(row, "cost_class")?.parse()?,
            priority: column(row, "priority")?,
            scheduled_for: column(row, "scheduled_for")?,
            started_at: column(row, "started_at")?,
            completed_at: column(row, "completed_at")?,
            retry_count: counter(row, "retry_count")?,
            max_retries: counter(row, "max_retries")?,
            fingerprint_hash: column(row, "fingerprint_hash")?,
            deferred_reason: column(row, "deferred_reason")?,
            error_message: column(row, "error_message")?,
            cost_usd: column(row, "cost_usd")?,
            input_tokens: column(row, "input_tokens")?,
            output_tokens: column(row, "output_tokens")?,
            candidates_created: counter(row, "candidates_created")?,
            created_at: column(row, "created_at")?,
            updated_at: column(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: &ResearchJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO research_jobs (
                id, mode, status, cost_class, priority, scheduled_for,
                started_at, completed_at, retry_count, max_retries,
                fingerprint_hash, deferred_reason, error_message, cost_usd,
                input_tokens, output_tokens, candidates_created, created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(job.id.to_uuid())
        .bind(job.mode.as_str())
        .bind(job.status.as_str())
        .bind(job.cost_class.as_str())
        .bind(job.priority)
        .bind(job.scheduled_for)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(to_db_counter(job.retry_count))
        .bind(to_db_counter(job.max_retries))
        .bind(job.fingerprint_hash.as_deref())
        .bind(job.deferred_reason.as_deref())
        .bind(job.error_message.as_deref())
        .bind(job.cost_usd)
        .bind(job.input_tokens)
        .bind(job.output_tokens)
        .bind(to_db_counter(job.candidates_created))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OrchestratorError::Internal(format!(
                "failed to insert research job {}: {e}",
                job.id
            ))
        })?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<ResearchJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM research_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<ResearchJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM research_jobs \
             WHERE ($1::text[] IS NULL OR status = ANY($1)) \
               AND ($2::text IS NULL OR mode = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3"
        );
        let statuses: Option<Vec<String>> = (!filter.statuses.is_empty())
            .then(|| {
                filter
                    .statuses
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect()
            });
        let limit = filter.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(&sql)
            .bind(statuses)
            .bind(filter.mode.map(|m| m.as_str()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM research_jobs WHERE status = $1",
        )
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn compare_and_swap(
        &self,
        job: &ResearchJob,
        expected: JobStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE research_jobs SET
                status = $3,
                priority = $4,
                scheduled_for = $5,
                started_at = $6,
                completed_at = $7,
                retry_count = $8,
                max_retries = $9,
                fingerprint_hash = $10,
                deferred_reason = $11,
                error_message = $12,
                cost_usd = $13,
                input_tokens = $14,
                output_tokens = $15,
                candidates_created = $16,
                updated_at = $17
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(job.id.to_uuid())
        .bind(expected.as_str())
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.scheduled_for)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(to_db_counter(job.retry_count))
        .bind(to_db_counter(job.max_retries))
        .bind(job.fingerprint_hash.as_deref())
        .bind(job.deferred_reason.as_deref())
        .bind(job.error_message.as_deref())
        .bind(job.cost_usd)
        .bind(job.input_tokens)
        .bind(job.output_tokens)
        .bind(to_db_counter(job.candidates_created))
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            // Partial unique index: another job of this mode is RUNNING.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
