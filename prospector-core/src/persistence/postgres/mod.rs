//! Postgres implementations of the storage ports. Queries go through the
//! runtime-checked `sqlx::query` API; the schema lives in `migrations/`.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use super::OrchestratorStores;
use crate::error::{OrchestratorError, Result};

mod budgets;
mod candidates;
mod fingerprints;
mod jobs;
mod lock;
mod state;

pub use budgets::PostgresBudgetLedger;
pub use candidates::PostgresCandidateSink;
pub use fingerprints::PostgresFingerprintStore;
pub use jobs::PostgresJobStore;
pub use lock::PostgresLock;
pub use state::PostgresStateStore;

/// Every port backed by the same pool.
pub fn postgres_stores(pool: PgPool) -> OrchestratorStores {
    OrchestratorStores {
        jobs: Arc::new(PostgresJobStore::new(pool.clone())),
        fingerprints: Arc::new(PostgresFingerprintStore::new(pool.clone())),
        budgets: Arc::new(PostgresBudgetLedger::new(pool.clone())),
        state: Arc::new(PostgresStateStore::new(pool.clone())),
        lock: Arc::new(PostgresLock::new(pool)),
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| {
        OrchestratorError::Internal(format!("failed to read {name}: {e}"))
    })
}

/// Counters are stored as INTEGER and never negative.
fn counter(row: &PgRow, name: &str) -> Result<u32> {
    let raw: i32 = column(row, name)?;
    u32::try_from(raw).map_err(|_| {
        OrchestratorError::Internal(format!("negative {name}: {raw}"))
    })
}

fn to_db_counter(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
