use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prospector_model::{CandidateFingerprint, CandidateId};
use sqlx::{PgPool, postgres::PgRow};
use uuid::Uuid;

use super::{column, counter};
use crate::{
    error::Result,
    persistence::{FingerprintObservation, FingerprintStore},
};

const FINGERPRINT_COLUMNS: &str =
    "fingerprint_hash, candidate_id, hit_count, last_seen_at, expires_at, \
     created_at";

#[derive(Debug, Clone)]
pub struct PostgresFingerprintStore {
    pool: PgPool,
}

impl PostgresFingerprintStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: &PgRow) -> Result<CandidateFingerprint> {
        let candidate_id: Option<Uuid> = column(row, "candidate_id")?;
        Ok(CandidateFingerprint {
            fingerprint_hash: column(row, "fingerprint_hash")?,
            candidate_id: candidate_id.map(CandidateId),
            hit_count: counter(row, "hit_count")?,
            last_seen_at: column(row, "last_seen_at")?,
            expires_at: column(row, "expires_at")?,
            created_at: column(row, "created_at")?,
        })
    }
}

#[async_trait]
impl FingerprintStore for PostgresFingerprintStore {
    async fn observe(
        &self,
        hash: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<FingerprintObservation> {
        // An expired row is rewritten as a first sighting; a live one only
        // has its counter and last_seen_at bumped.
        let sql = format!(
            r#"
            INSERT INTO candidate_fingerprints AS fp (
                fingerprint_hash, candidate_id, hit_count, last_seen_at,
                expires_at, created_at
            )
            VALUES ($1, NULL, 1, $2, $3, $2)
            ON CONFLICT (fingerprint_hash) DO UPDATE SET
                candidate_id = CASE WHEN fp.expires_at < $2
                    THEN NULL ELSE fp.candidate_id END,
                hit_count = CASE WHEN fp.expires_at < $2
                    THEN 1 ELSE fp.hit_count + 1 END,
                expires_at = CASE WHEN fp.expires_at < $2
                    THEN EXCLUDED.expires_at ELSE fp.expires_at END,
                created_at = CASE WHEN fp.expires_at < $2
                    THEN $2 ELSE fp.created_at END,
                last_seen_at = $2
            RETURNING {FINGERPRINT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(hash)
            .bind(now)
            .bind(expires_at)
            .fetch_one(&self.pool)
            .await?;
        let record = Self::map_row(&row)?;
        Ok(if record.hit_count == 1 {
            FingerprintObservation::Fresh(record)
        } else {
            FingerprintObservation::Duplicate(record)
        })
    }

    async fn attach_candidate(
        &self,
        hash: &str,
        candidate_id: CandidateId,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE candidate_fingerprints SET candidate_id = $2 \
             WHERE fingerprint_hash = $1",
        )
        .bind(hash)
        .bind(candidate_id.to_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateFingerprint>> {
        let sql = format!(
            "SELECT {FINGERPRINT_COLUMNS} FROM candidate_fingerprints \
             WHERE fingerprint_hash = $1 \
               AND (expires_at IS NULL OR expires_at >= $2)"
        );
        let row = sqlx::query(&sql)
            .bind(hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn recent(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateFingerprint>> {
        let sql = format!(
            "SELECT {FINGERPRINT_COLUMNS} FROM candidate_fingerprints \
             WHERE expires_at IS NULL OR expires_at >= $1 \
             ORDER BY last_seen_at DESC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query(
            "DELETE FROM candidate_fingerprints WHERE expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}
