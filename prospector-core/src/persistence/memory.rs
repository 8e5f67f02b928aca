//! Mutex-guarded in-process stores. Semantics match the Postgres
//! implementations, including the one-running-per-mode constraint.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prospector_model::{
    CandidateFingerprint, CandidateId, JobId, JobStatus, LlmBudget,
    OrchestratorState, ResearchJob,
};
use tokio::sync::Mutex;

use super::{
    BudgetLedger, FingerprintObservation, FingerprintStore, JobFilter,
    JobStore, OrchestratorStores, StateStore,
};
use crate::{error::Result, orchestration::lock::InMemoryLock};

/// Fresh set of empty in-memory stores.
pub fn in_memory_stores() -> OrchestratorStores {
    OrchestratorStores {
        jobs: Arc::new(InMemoryJobStore::default()),
        fingerprints: Arc::new(InMemoryFingerprintStore::default()),
        budgets: Arc::new(InMemoryBudgetLedger::default()),
        state: Arc::new(InMemoryStateStore::default()),
        lock: Arc::new(InMemoryLock::new()),
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, ResearchJob>>,
}

impl fmt::Debug for InMemoryJobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryJobStore");
        match self.jobs.try_lock() {
            Ok(jobs) => {
                debug.field("jobs", &jobs.len());
            }
            Err(_) => {
                debug.field("jobs", &"<locked>");
            }
        }
        debug.finish()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &ResearchJob) -> Result<()> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<ResearchJob>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn list(&self, filter: JobFilter) -> Result<Vec<ResearchJob>> {
        let jobs = self.jobs.lock().await;
        let mut out: Vec<ResearchJob> =
            jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        out.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<usize> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.values().filter(|j| j.status == status).count())
    }

    async fn compare_and_swap(
        &self,
        job: &ResearchJob,
        expected: JobStatus,
    ) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get(&job.id) {
            Some(current) if current.status == expected => {}
            _ => return Ok(false),
        }
        if job.status == JobStatus::Running
            && jobs.values().any(|other| {
                other.id != job.id
                    && other.mode == job.mode
                    && other.status == JobStatus::Running
            })
        {
            return Ok(false);
        }
        jobs.insert(job.id, job.clone());
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryFingerprintStore {
    records: Mutex<HashMap<String, CandidateFingerprint>>,
}

impl fmt::Debug for InMemoryFingerprintStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryFingerprintStore");
        match self.records.try_lock() {
            Ok(records) => {
                debug.field("records", &records.len());
            }
            Err(_) => {
                debug.field("records", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryFingerprintStore {
    /// Raw row regardless of expiry, for assertions.
    pub async fn stored(&self, hash: &str) -> Option<CandidateFingerprint> {
        self.records.lock().await.get(hash).cloned()
    }

    pub async fn stored_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn observe(
        &self,
        hash: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<FingerprintObservation> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get_mut(hash)
            && !existing.is_expired(now)
        {
            existing.record_hit(now);
            return Ok(FingerprintObservation::Duplicate(existing.clone()));
        }
        let fresh = CandidateFingerprint::fresh(hash, now, expires_at);
        records.insert(hash.to_string(), fresh.clone());
        Ok(FingerprintObservation::Fresh(fresh))
    }

    async fn attach_candidate(
        &self,
        hash: &str,
        candidate_id: CandidateId,
    ) -> Result<()> {
        if let Some(record) = self.records.lock().await.get_mut(hash) {
            record.candidate_id = Some(candidate_id);
        }
        Ok(())
    }

    async fn get(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateFingerprint>> {
        Ok(self
            .records
            .lock()
            .await
            .get(hash)
            .filter(|fp| !fp.is_expired(now))
            .cloned())
    }

    async fn recent(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateFingerprint>> {
        let records = self.records.lock().await;
        let mut live: Vec<CandidateFingerprint> = records
            .values()
            .filter(|fp| !fp.is_expired(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        live.truncate(limit);
        Ok(live)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, fp| !fp.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryBudgetLedger {
    rows: Mutex<HashMap<String, LlmBudget>>,
}

impl fmt::Debug for InMemoryBudgetLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryBudgetLedger");
        match self.rows.try_lock() {
            Ok(rows) => {
                debug.field("providers", &rows.keys().collect::<Vec<_>>());
            }
            Err(_) => {
                debug.field("providers", &"<locked>");
            }
        }
        debug.finish()
    }
}

#[async_trait]
impl BudgetLedger for InMemoryBudgetLedger {
    async fn get(&self, provider: &str) -> Result<Option<LlmBudget>> {
        Ok(self.rows.lock().await.get(provider).cloned())
    }

    async fn list(&self) -> Result<Vec<LlmBudget>> {
        let mut rows: Vec<LlmBudget> =
            self.rows.lock().await.values().cloned().collect();
        rows.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(rows)
    }

    async fn upsert_limits(
        &self,
        provider: &str,
        daily_budget: f64,
        period_budget: f64,
    ) -> Result<LlmBudget> {
        let mut rows = self.rows.lock().await;
        let row = rows.entry(provider.to_string()).or_insert_with(|| {
            LlmBudget::new(provider, daily_budget, period_budget)
        });
        row.daily_budget = daily_budget;
        row.period_budget = period_budget;
        Ok(row.clone())
    }

    async fn charge(
        &self,
        provider: &str,
        cost: f64,
    ) -> Result<Option<LlmBudget>> {
        let mut rows = self.rows.lock().await;
        Ok(rows.get_mut(provider).map(|row| {
            row.charge(cost);
            row.clone()
        }))
    }

    async fn reset_daily(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut rows = self.rows.lock().await;
        let mut reset: Vec<String> = rows
            .values_mut()
            .filter_map(|row| {
                row.apply_daily_reset(now).then(|| row.provider.clone())
            })
            .collect();
        reset.sort();
        Ok(reset)
    }
}

#[derive(Default)]
pub struct InMemoryStateStore {
    row: Mutex<Option<OrchestratorState>>,
}

impl fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryStateStore");
        match self.row.try_lock() {
            Ok(row) => {
                debug.field("initialised", &row.is_some());
            }
            Err(_) => {
                debug.field("row", &"<locked>");
            }
        }
        debug.finish()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> Result<Option<OrchestratorState>> {
        Ok(self.row.lock().await.clone())
    }

    async fn init_if_absent(
        &self,
        initial: OrchestratorState,
    ) -> Result<OrchestratorState> {
        let mut row = self.row.lock().await;
        Ok(row.get_or_insert(initial).clone())
    }

    async fn save(&self, state: &OrchestratorState) -> Result<()> {
        *self.row.lock().await = Some(state.clone());
        Ok(())
    }
}
