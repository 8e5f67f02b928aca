use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    orchestration::lock::{LockLease, OrchestratorLock},
};

/// Lease rows in `orchestrator_locks`. Takeover is a single upsert guarded
/// by the current row's expiry, so two instances can never both win.
#[derive(Debug, Clone)]
pub struct PostgresLock {
    pool: PgPool,
}

impl PostgresLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrchestratorLock for PostgresLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<LockLease>> {
        let token = Uuid::now_v7();
        let expires_at = now + ttl;
        let acquired: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO orchestrator_locks AS l (name, holder, token, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE SET
                holder = EXCLUDED.holder,
                token = EXCLUDED.token,
                expires_at = EXCLUDED.expires_at
            WHERE l.expires_at < $5
            RETURNING name
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.map(|name| LockLease {
            name,
            holder: holder.to_string(),
            token,
            expires_at,
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        sqlx::query(
            "DELETE FROM orchestrator_locks WHERE name = $1 AND token = $2",
        )
        .bind(&lease.name)
        .bind(lease.token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
