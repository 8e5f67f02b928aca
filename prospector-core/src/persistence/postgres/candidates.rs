use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::{
    error::Result,
    orchestration::sink::{CandidateBatch, CandidateSink},
};

/// Writes accepted candidates to the `research_candidates` outbox consumed
/// by the review pipeline.
#[derive(Debug, Clone)]
pub struct PostgresCandidateSink {
    pool: PgPool,
}

impl PostgresCandidateSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateSink for PostgresCandidateSink {
    async fn submit(&self, batch: CandidateBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for accepted in &batch.candidates {
            sqlx::query(
                r#"
                INSERT INTO research_candidates (
                    candidate_id, job_id, mode, fingerprint_hash, name,
                    archetype_name, hypothesis, rules_json, produced_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (candidate_id) DO NOTHING
                "#,
            )
            .bind(accepted.candidate_id.to_uuid())
            .bind(batch.job_id.to_uuid())
            .bind(batch.mode.as_str())
            .bind(&accepted.fingerprint_hash)
            .bind(&accepted.candidate.name)
            .bind(&accepted.candidate.archetype_name)
            .bind(&accepted.candidate.hypothesis)
            .bind(&accepted.candidate.rules_json)
            .bind(batch.produced_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(
            target: "research::dispatch",
            job_id = %batch.job_id,
            candidates = batch.candidates.len(),
            "candidates written to outbox"
        );
        Ok(())
    }
}
