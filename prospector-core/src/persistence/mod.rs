//! Storage ports consumed by the orchestrator, with in-memory and Postgres
//! implementations.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prospector_model::{
    CandidateFingerprint, CandidateId, JobId, JobStatus, LlmBudget,
    OrchestratorState, ResearchJob, ResearchMode,
};

use crate::{error::Result, orchestration::lock::OrchestratorLock};

pub mod memory;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod postgres;

/// Selection criteria for [`JobStore::list`].
#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    /// Empty matches every status.
    pub statuses: Vec<JobStatus>,
    pub mode: Option<ResearchMode>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn statuses(statuses: &[JobStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &ResearchJob) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.mode.is_none_or(|mode| mode == job.mode)
    }
}

/// Durable research job records.
#[async_trait]
pub trait JobStore: Send + Sync + fmt::Debug {
    async fn insert(&self, job: &ResearchJob) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<ResearchJob>>;

    /// Jobs matching `filter`, newest first.
    async fn list(&self, filter: JobFilter) -> Result<Vec<ResearchJob>>;

    async fn count_by_status(&self, status: JobStatus) -> Result<usize>;

    /// Persist `job` only if the stored row is still in `expected`. Writing a
    /// RUNNING row fails (returns false) when another job of the same mode
    /// is already RUNNING.
    async fn compare_and_swap(
        &self,
        job: &ResearchJob,
        expected: JobStatus,
    ) -> Result<bool>;
}

/// Result of recording one sighting of a fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FingerprintObservation {
    /// First sighting, or the previous record had expired and was replaced.
    Fresh(CandidateFingerprint),
    /// An unexpired record existed and its hit count was bumped.
    Duplicate(CandidateFingerprint),
}

impl FingerprintObservation {
    pub fn record(&self) -> &CandidateFingerprint {
        match self {
            FingerprintObservation::Fresh(fp)
            | FingerprintObservation::Duplicate(fp) => fp,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, FingerprintObservation::Duplicate(_))
    }
}

/// TTL-bound dedup records keyed by content hash.
#[async_trait]
pub trait FingerprintStore: Send + Sync + fmt::Debug {
    /// Atomic lookup-or-insert. An unexpired match has its hit count and
    /// `last_seen_at` bumped; an expired one is replaced by a fresh record
    /// expiring at `expires_at`.
    async fn observe(
        &self,
        hash: &str,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<FingerprintObservation>;

    async fn attach_candidate(
        &self,
        hash: &str,
        candidate_id: CandidateId,
    ) -> Result<()>;

    /// Unexpired record for `hash`.
    async fn get(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateFingerprint>>;

    /// Most recently seen unexpired records.
    async fn recent(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateFingerprint>>;

    /// Physically delete expired rows. Returns the number removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Per-provider spend ledger.
#[async_trait]
pub trait BudgetLedger: Send + Sync + fmt::Debug {
    async fn get(&self, provider: &str) -> Result<Option<LlmBudget>>;

    async fn list(&self) -> Result<Vec<LlmBudget>>;

    /// Create the row or update its ceilings, keeping accumulated usage.
    async fn upsert_limits(
        &self,
        provider: &str,
        daily_budget: f64,
        period_budget: f64,
    ) -> Result<LlmBudget>;

    /// Add `cost` to both windows. `None` when the provider has no row.
    async fn charge(
        &self,
        provider: &str,
        cost: f64,
    ) -> Result<Option<LlmBudget>>;

    /// Apply [`LlmBudget::apply_daily_reset`] to every row. Returns the
    /// providers that were actually reset.
    async fn reset_daily(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}

/// The single orchestrator state row.
#[async_trait]
pub trait StateStore: Send + Sync + fmt::Debug {
    async fn load(&self) -> Result<Option<OrchestratorState>>;

    /// Insert `initial` unless a row exists; returns the stored row.
    async fn init_if_absent(
        &self,
        initial: OrchestratorState,
    ) -> Result<OrchestratorState>;

    async fn save(&self, state: &OrchestratorState) -> Result<()>;
}

/// Bundle of every port the orchestrator reads and writes.
#[derive(Clone)]
pub struct OrchestratorStores {
    pub jobs: Arc<dyn JobStore>,
    pub fingerprints: Arc<dyn FingerprintStore>,
    pub budgets: Arc<dyn BudgetLedger>,
    pub state: Arc<dyn StateStore>,
    pub lock: Arc<dyn OrchestratorLock>,
}

impl fmt::Debug for OrchestratorStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorStores")
            .field("jobs", &self.jobs)
            .field("fingerprints", &self.fingerprints)
            .field("budgets", &self.budgets)
            .field("state", &self.state)
            .field("lock", &self.lock)
            .finish()
    }
}
