//! The orchestrator service. Every mutation of jobs, budgets and the state
//! row happens inside a short critical section under the distributed lease
//! lock; the executor call itself runs outside it.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use prospector_model::{
    JobId, JobStatus, JobUsage, LlmBudget, NewResearchJob, OrchestratorState,
    ResearchDiagnostics, ResearchJob, ResearchMode,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    budget::{Admission, admit, quota_snapshot},
    clock::Clock,
    config::{CostClassPolicies, OrchestratorConfig},
    dedup::{
        AcceptedCandidate, Deduplicator, DuplicateCandidate, ScreenResult,
    },
    dispatcher::ExecutionOutcome,
    events::{
        EventMeta, EventPublisher, OrchestratorEvent, OrchestratorEventPayload,
        TickSkipReason,
    },
    lock::LockLease,
    scheduler::{
        ModeEligibility, eligibility_report, job_gate, rank, seedable_modes,
    },
    sink::{CandidateBatch, CandidateSink},
};
use crate::{
    error::{OrchestratorError, Result},
    persistence::{JobFilter, OrchestratorStores},
};

/// Message recorded on jobs whose executing instance disappeared.
pub const REASON_LEASE_EXPIRED: &str = "execution lease expired";

/// Explicit operator request for a research run.
#[derive(Clone, Debug, PartialEq)]
pub struct EnqueueRequest {
    pub mode: ResearchMode,
    /// Defaults to the mode's configured priority.
    pub priority: Option<i32>,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Defaults to the mode's configured retry budget.
    pub max_retries: Option<u32>,
}

impl EnqueueRequest {
    pub fn new(mode: ResearchMode) -> Self {
        Self {
            mode,
            priority: None,
            scheduled_for: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Result of one scheduling decision.
#[derive(Clone, Debug, PartialEq)]
pub enum TickOutcome {
    /// Another holder owns the lease; this instance stands aside.
    LockBusy,
    Saturated { running: usize },
    /// Nothing launched. Lists jobs deferred on budget during this tick.
    Idle { deferred: Vec<JobId> },
    Launched { job: ResearchJob, deferred: Vec<JobId> },
}

impl TickOutcome {
    pub fn launched(&self) -> Option<&ResearchJob> {
        match self {
            TickOutcome::Launched { job, .. } => Some(job),
            _ => None,
        }
    }
}

/// How a recorded outcome was applied.
#[derive(Clone, Debug, PartialEq)]
pub enum OutcomeDisposition {
    Completed,
    /// Terminal failure; no retries left.
    Failed,
    RetryScheduled { attempt: u32, run_after: DateTime<Utc> },
    Cancelled,
    /// The job was no longer RUNNING; only reported spend was kept.
    Discarded { status: JobStatus },
}

#[derive(Clone, Debug)]
pub struct CompletionReport {
    pub job: ResearchJob,
    pub disposition: OutcomeDisposition,
    pub accepted: Vec<AcceptedCandidate>,
    pub duplicates: Vec<DuplicateCandidate>,
    /// Accepted candidates the sink refused. Their ideas stay unrecorded.
    pub undelivered: Vec<AcceptedCandidate>,
    pub charged_usd: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DailyResetReport {
    pub providers: Vec<String>,
    pub totals_reset: bool,
}

impl DailyResetReport {
    pub fn is_noop(&self) -> bool {
        self.providers.is_empty() && !self.totals_reset
    }
}

/// Operator view of the orchestrator.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorSnapshot {
    pub taken_at: DateTime<Utc>,
    pub instance_id: String,
    pub state: OrchestratorState,
    pub budgets: Vec<LlmBudget>,
    pub running: usize,
    pub queued: usize,
    pub deferred: usize,
    pub max_concurrent: usize,
    pub modes: Vec<ModeEligibility>,
}

pub struct ResearchOrchestrator {
    config: OrchestratorConfig,
    stores: OrchestratorStores,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventPublisher>,
    sink: Arc<dyn CandidateSink>,
    dedup: Deduplicator,
    tick_gate: Mutex<()>,
}

impl fmt::Debug for ResearchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResearchOrchestrator")
            .field("instance_id", &self.config.instance_id)
            .field("stores", &self.stores)
            .field("clock", &self.clock)
            .field("events", &self.events)
            .field("sink", &self.sink)
            .finish()
    }
}

impl ResearchOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        stores: OrchestratorStores,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventPublisher>,
        sink: Arc<dyn CandidateSink>,
    ) -> Result<Self> {
        config.validate()?;
        let dedup =
            Deduplicator::new(stores.fingerprints.clone(), config.dedup.ttl());
        Ok(Self {
            config,
            stores,
            clock,
            events,
            sink,
            dedup,
            tick_gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn stores(&self) -> &OrchestratorStores {
        &self.stores
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Create the state row if absent and seed configured budget ceilings.
    /// Existing budget rows keep their accumulated usage, and an existing
    /// state row keeps its full-spectrum toggle.
    pub async fn bootstrap(&self) -> Result<OrchestratorState> {
        let lease = self.lock_with_retry().await?;
        let result = self.bootstrap_locked().await;
        self.release(&lease).await;
        result
    }

    async fn bootstrap_locked(&self) -> Result<OrchestratorState> {
        let now = self.clock.now();
        let mut state = self.load_state(now).await?;
        for seed in &self.config.budgets {
            self.stores
                .budgets
                .upsert_limits(
                    &seed.provider,
                    seed.daily_budget,
                    seed.period_budget,
                )
                .await?;
        }
        state.provider_quota_json =
            quota_snapshot(&self.stores.budgets.list().await?);
        state.updated_at = now;
        self.stores.state.save(&state).await?;
        if state.is_full_spectrum_enabled != self.config.full_spectrum_enabled {
            warn!(
                target: "research::runtime",
                persisted = state.is_full_spectrum_enabled,
                configured = self.config.full_spectrum_enabled,
                "full-spectrum setting only seeds a new state row; \
                 use `prospector full-spectrum` to change it"
            );
        }
        info!(
            target: "research::runtime",
            instance = %self.config.instance_id,
            full_spectrum = state.is_full_spectrum_enabled,
            providers = self.config.budgets.len(),
            "orchestrator bootstrapped"
        );
        Ok(state)
    }

    /// Insert a QUEUED job. Inserts never contend, so no lock is taken.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<ResearchJob> {
        let now = self.clock.now();
        let policy = self.config.modes.get(request.mode);
        let job = NewResearchJob::new(
            request.mode,
            request.priority.unwrap_or(policy.priority),
            request.max_retries.unwrap_or(policy.max_retries),
        )
        .scheduled_for(request.scheduled_for)
        .build(now);
        self.stores.jobs.insert(&job).await?;
        info!(
            target: "research::scheduler",
            job_id = %job.id,
            mode = %job.mode,
            priority = job.priority,
            "research job enqueued"
        );
        self.status_changed(&job, None, None).await;
        Ok(job)
    }

    pub async fn job(&self, id: JobId) -> Result<Option<ResearchJob>> {
        self.stores.jobs.get(id).await
    }

    pub async fn jobs(&self, filter: JobFilter) -> Result<Vec<ResearchJob>> {
        self.stores.jobs.list(filter).await
    }

    /// One scheduling decision. Never waits for the distributed lock and
    /// launches at most one job.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let _serial = self.tick_gate.lock().await;
        let now = self.clock.now();
        let Some(lease) = self.try_lock(now).await? else {
            debug!(
                target: "research::scheduler",
                instance = %self.config.instance_id,
                "lease held elsewhere; skipping tick"
            );
            self.emit(OrchestratorEventPayload::TickSkipped {
                reason: TickSkipReason::LockBusy,
            })
            .await;
            return Ok(TickOutcome::LockBusy);
        };
        let result = self.tick_locked(now).await;
        self.release(&lease).await;
        result
    }

    async fn tick_locked(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let jobs = &self.stores.jobs;
        let modes = &self.config.modes;
        let mut state = self.load_state(now).await?;

        let running = jobs.list(JobFilter::status(JobStatus::Running)).await?;
        let budgets: HashMap<String, LlmBudget> = self
            .stores
            .budgets
            .list()
            .await?
            .into_iter()
            .map(|row| (row.provider.clone(), row))
            .collect();
        let reserved = reservations(&running, &self.config.cost_classes);

        for mut job in jobs.list(JobFilter::status(JobStatus::Deferred)).await? {
            if !job_gate(&job, modes, &state, now).is_ready()
                || !self.admission(&job, &budgets, &reserved).is_admitted()
            {
                continue;
            }
            job.requeue_deferred(now)?;
            if jobs.compare_and_swap(&job, JobStatus::Deferred).await? {
                debug!(
                    target: "research::scheduler",
                    job_id = %job.id,
                    mode = %job.mode,
                    "deferred job re-queued"
                );
                self.status_changed(&job, Some(JobStatus::Deferred), None)
                    .await;
            }
        }

        if running.len() >= self.config.max_concurrent {
            debug!(
                target: "research::scheduler",
                running = running.len(),
                max = self.config.max_concurrent,
                "concurrency cap reached"
            );
            self.emit(OrchestratorEventPayload::TickSkipped {
                reason: TickSkipReason::Saturated {
                    running: running.len(),
                },
            })
            .await;
            return Ok(TickOutcome::Saturated {
                running: running.len(),
            });
        }

        let pending = jobs
            .list(JobFilter::statuses(&[
                JobStatus::Queued,
                JobStatus::Deferred,
            ]))
            .await?;
        let pending_modes: HashSet<ResearchMode> = pending
            .iter()
            .chain(running.iter())
            .map(|job| job.mode)
            .collect();
        let busy_modes: HashSet<ResearchMode> = running
            .iter()
            .flat_map(|job| job.mode.sub_modes().iter().copied())
            .collect();

        // Jobs still DEFERRED after the re-queue pass stay parked.
        let mut candidates: Vec<ResearchJob> = pending
            .into_iter()
            .filter(|job| job.status == JobStatus::Queued && job.is_due(now))
            .collect();
        let mut seeds = HashSet::new();
        for mode in seedable_modes(modes, &state, now) {
            if pending_modes.contains(&mode) {
                continue;
            }
            let policy = modes.get(mode);
            let seed = NewResearchJob::new(
                mode,
                policy.priority,
                policy.max_retries,
            )
            .build(now);
            seeds.insert(seed.id);
            candidates.push(seed);
        }

        candidates.retain(|job| {
            let gate = job_gate(job, modes, &state, now);
            if !gate.is_ready() {
                debug!(
                    target: "research::scheduler",
                    job_id = %job.id,
                    mode = %job.mode,
                    gate = ?gate,
                    "candidate gated"
                );
                return false;
            }
            !job.mode.sub_modes().iter().any(|m| busy_modes.contains(m))
        });
        rank(&mut candidates);

        let mut deferred = Vec::new();
        // Backpressure rises at most once per mode per tick.
        let mut pressured = HashSet::new();
        for job in candidates {
            let is_seed = seeds.contains(&job.id);
            if let Admission::Denied { provider, reason } =
                self.admission(&job, &budgets, &reserved)
            {
                if is_seed {
                    self.insert_seed(&job).await?;
                }
                let mut blocked = job;
                blocked.defer(now, reason.clone())?;
                if jobs.compare_and_swap(&blocked, JobStatus::Queued).await? {
                    if pressured.insert(blocked.mode) {
                        state.raise_backpressure(blocked.mode);
                    }
                    info!(
                        target: "research::budget",
                        job_id = %blocked.id,
                        mode = %blocked.mode,
                        provider = %provider,
                        reason = %reason,
                        "job deferred"
                    );
                    self.status_changed(
                        &blocked,
                        Some(JobStatus::Queued),
                        Some(reason),
                    )
                    .await;
                    deferred.push(blocked.id);
                }
                continue;
            }

            if is_seed {
                self.insert_seed(&job).await?;
            }
            let mut claimed = job;
            claimed.start(now)?;
            if !jobs.compare_and_swap(&claimed, JobStatus::Queued).await? {
                debug!(
                    target: "research::scheduler",
                    job_id = %claimed.id,
                    mode = %claimed.mode,
                    "claim lost; trying next candidate"
                );
                continue;
            }
            state.stamp_run(claimed.mode, now);
            self.stores.state.save(&state).await?;
            info!(
                target: "research::scheduler",
                job_id = %claimed.id,
                mode = %claimed.mode,
                priority = claimed.priority,
                retry = claimed.retry_count,
                running = running.len() + 1,
                "research job launched"
            );
            self.status_changed(&claimed, Some(JobStatus::Queued), None)
                .await;
            return Ok(TickOutcome::Launched {
                job: claimed,
                deferred,
            });
        }

        if !deferred.is_empty() {
            state.updated_at = now;
            self.stores.state.save(&state).await?;
        }
        self.emit(OrchestratorEventPayload::TickSkipped {
            reason: TickSkipReason::NothingEligible,
        })
        .await;
        Ok(TickOutcome::Idle { deferred })
    }

    async fn insert_seed(&self, job: &ResearchJob) -> Result<()> {
        self.stores.jobs.insert(job).await?;
        debug!(
            target: "research::scheduler",
            job_id = %job.id,
            mode = %job.mode,
            "mode seeded"
        );
        self.status_changed(job, None, None).await;
        Ok(())
    }

    fn admission(
        &self,
        job: &ResearchJob,
        budgets: &HashMap<String, LlmBudget>,
        reserved: &HashMap<String, f64>,
    ) -> Admission {
        let policy = self.config.cost_classes.get(job.cost_class);
        admit(
            budgets.get(&policy.provider),
            policy,
            reserved.get(&policy.provider).copied().unwrap_or(0.0),
        )
    }

    /// Apply a finished run. Accepted candidates are handed to the sink
    /// inside the critical section; their fingerprints are only recorded
    /// once the sink took the batch.
    pub async fn record_outcome(
        &self,
        job_id: JobId,
        outcome: ExecutionOutcome,
    ) -> Result<CompletionReport> {
        let lease = self.lock_with_retry().await?;
        let result = self.record_locked(job_id, outcome).await;
        self.release(&lease).await;
        result
    }

    /// Submit the accepted candidates and commit their fingerprints. A
    /// rejected batch is withdrawn and returned so the ideas stay new.
    async fn deliver(
        &self,
        job: &ResearchJob,
        screened: &mut ScreenResult,
        now: DateTime<Utc>,
    ) -> Result<Vec<AcceptedCandidate>> {
        if screened.accepted.is_empty() {
            self.dedup.commit(screened, now).await?;
            return Ok(Vec::new());
        }
        let batch = CandidateBatch {
            job_id: job.id,
            mode: job.mode,
            candidates: screened.accepted.clone(),
            produced_at: now,
        };
        match self.sink.submit(batch).await {
            Ok(()) => {
                self.dedup.commit(screened, now).await?;
                Ok(Vec::new())
            }
            Err(error) => {
                warn!(
                    target: "research::dispatch",
                    job_id = %job.id,
                    candidates = screened.accepted.len(),
                    error = %error,
                    "candidate sink rejected batch; fingerprints not recorded"
                );
                Ok(screened.withdraw())
            }
        }
    }

    async fn record_locked(
        &self,
        job_id: JobId,
        outcome: ExecutionOutcome,
    ) -> Result<CompletionReport> {
        let now = self.clock.now();
        let job = self.stores.jobs.get(job_id).await?.ok_or_else(|| {
            OrchestratorError::NotFound(format!("research job {job_id}"))
        })?;
        let usage = usage_of(&job, outcome.diagnostics());
        let mut state = self.load_state(now).await?;

        if job.status != JobStatus::Running {
            let charged = self.charge(&job, usage.cost_usd, &mut state).await?;
            if charged > 0.0 {
                state.updated_at = now;
                self.stores.state.save(&state).await?;
            }
            info!(
                target: "research::dispatch",
                job_id = %job.id,
                status = %job.status,
                outcome = outcome.label(),
                "outcome discarded; job no longer running"
            );
            let status = job.status;
            return Ok(CompletionReport {
                job,
                disposition: OutcomeDisposition::Discarded { status },
                accepted: Vec::new(),
                duplicates: Vec::new(),
                undelivered: Vec::new(),
                charged_usd: charged,
            });
        }

        let mut accepted = Vec::new();
        let mut duplicates = Vec::new();
        let mut undelivered = Vec::new();
        let mut settled = job.clone();
        let mut disposition = match outcome {
            ExecutionOutcome::Succeeded { candidates, .. } => {
                let mut screened = self.dedup.screen(candidates, now).await?;
                undelivered = self.deliver(&job, &mut screened, now).await?;
                if let Some(hash) = screened.representative_hash() {
                    settled.fingerprint_hash = Some(hash.to_string());
                }
                settled.complete(
                    now,
                    usage,
                    screened.accepted.len() as u32,
                )?;
                accepted = screened.accepted;
                duplicates = screened.duplicates;
                OutcomeDisposition::Completed
            }
            ExecutionOutcome::Failed { message, .. } => {
                settled.fail(now, message, usage)?;
                OutcomeDisposition::Failed
            }
            ExecutionOutcome::Cancelled { .. } => {
                settled.cancel(now)?;
                OutcomeDisposition::Cancelled
            }
        };

        if !self
            .stores
            .jobs
            .compare_and_swap(&settled, JobStatus::Running)
            .await?
        {
            return Err(OrchestratorError::Internal(format!(
                "job {job_id} changed while its outcome was recorded"
            )));
        }
        self.status_changed(&settled, Some(JobStatus::Running), None)
            .await;

        match disposition {
            OutcomeDisposition::Completed => {
                state.lower_backpressure(settled.mode)
            }
            OutcomeDisposition::Failed => state.raise_backpressure(settled.mode),
            _ => {}
        }
        // Cancelled runs still pay for what they consumed but carry no cost
        // and do not count towards the settled totals.
        let charged = self.charge(&settled, usage.cost_usd, &mut state).await?;
        if disposition != OutcomeDisposition::Cancelled {
            state.record_job_settled(charged);
        }

        if disposition == OutcomeDisposition::Failed && settled.retries_left() {
            let attempt = settled.retry_count + 1;
            let run_after = now
                .checked_add_signed(self.config.retry.delay_for(attempt))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let mut retry = settled.clone();
            retry.requeue_for_retry(now, run_after)?;
            if self
                .stores
                .jobs
                .compare_and_swap(&retry, JobStatus::Failed)
                .await?
            {
                info!(
                    target: "research::dispatch",
                    job_id = %retry.id,
                    mode = %retry.mode,
                    attempt,
                    max_retries = retry.max_retries,
                    run_after = %run_after,
                    "retry scheduled"
                );
                self.status_changed(&retry, Some(JobStatus::Failed), None)
                    .await;
                settled = retry;
                disposition =
                    OutcomeDisposition::RetryScheduled { attempt, run_after };
            }
        }

        state.updated_at = now;
        self.stores.state.save(&state).await?;

        for duplicate in &duplicates {
            self.emit(OrchestratorEventPayload::DuplicateCandidate {
                job_id,
                fingerprint_hash: duplicate.fingerprint_hash.clone(),
                hit_count: duplicate.hit_count,
            })
            .await;
        }
        match &disposition {
            OutcomeDisposition::Failed => warn!(
                target: "research::dispatch",
                job_id = %settled.id,
                mode = %settled.mode,
                error = settled.error_message.as_deref().unwrap_or_default(),
                retries = settled.retry_count,
                "research job failed permanently"
            ),
            other => info!(
                target: "research::dispatch",
                job_id = %settled.id,
                mode = %settled.mode,
                disposition = ?other,
                accepted = accepted.len(),
                duplicates = duplicates.len(),
                cost_usd = charged,
                "outcome recorded"
            ),
        }

        Ok(CompletionReport {
            job: settled,
            disposition,
            accepted,
            duplicates,
            undelivered,
            charged_usd: charged,
        })
    }

    /// Add reported spend to the job's provider and refresh the quota
    /// snapshot on `state`. Returns the amount charged.
    async fn charge(
        &self,
        job: &ResearchJob,
        cost: Option<f64>,
        state: &mut OrchestratorState,
    ) -> Result<f64> {
        let Some(cost) = cost.filter(|c| *c > 0.0) else {
            return Ok(0.0);
        };
        let provider = &self.config.cost_classes.get(job.cost_class).provider;
        match self.stores.budgets.charge(provider, cost).await? {
            Some(row) => {
                debug!(
                    target: "research::budget",
                    job_id = %job.id,
                    provider = %provider,
                    cost_usd = cost,
                    used_today = row.used_today,
                    daily_budget = row.daily_budget,
                    "spend recorded"
                );
                self.emit(OrchestratorEventPayload::BudgetCharged {
                    job_id: job.id,
                    provider: provider.clone(),
                    cost_usd: cost,
                    used_today: row.used_today,
                    daily_budget: row.daily_budget,
                })
                .await;
            }
            None => warn!(
                target: "research::budget",
                job_id = %job.id,
                provider = %provider,
                cost_usd = cost,
                "no budget row for provider; spend not recorded"
            ),
        }
        state.provider_quota_json =
            quota_snapshot(&self.stores.budgets.list().await?);
        Ok(cost)
    }

    /// QUEUED or RUNNING → CANCELLED. A running executor keeps going until
    /// its runtime aborts it; whatever it reports later is discarded.
    pub async fn cancel(&self, job_id: JobId) -> Result<ResearchJob> {
        let lease = self.lock_with_retry().await?;
        let result = self.cancel_locked(job_id).await;
        self.release(&lease).await;
        result
    }

    async fn cancel_locked(&self, job_id: JobId) -> Result<ResearchJob> {
        let now = self.clock.now();
        let mut job = self.stores.jobs.get(job_id).await?.ok_or_else(|| {
            OrchestratorError::NotFound(format!("research job {job_id}"))
        })?;
        let from = job.status;
        if !matches!(from, JobStatus::Queued | JobStatus::Running) {
            return Err(OrchestratorError::invalid_transition(
                from,
                JobStatus::Cancelled,
            ));
        }
        job.cancel(now)?;
        if !self.stores.jobs.compare_and_swap(&job, from).await? {
            return Err(OrchestratorError::Internal(format!(
                "job {job_id} changed while being cancelled"
            )));
        }
        info!(
            target: "research::scheduler",
            job_id = %job.id,
            mode = %job.mode,
            from = %from,
            "research job cancelled"
        );
        self.status_changed(&job, Some(from), None).await;
        Ok(job)
    }

    /// Zero daily spend and totals once per UTC day. Also clamps every
    /// backpressure counter to its ceiling so parked modes get one probe
    /// run. Repeats on the same day change nothing.
    pub async fn reset_daily(&self) -> Result<DailyResetReport> {
        let lease = self.lock_with_retry().await?;
        let result = self.reset_daily_locked().await;
        self.release(&lease).await;
        result
    }

    async fn reset_daily_locked(&self) -> Result<DailyResetReport> {
        let now = self.clock.now();
        let providers = self.stores.budgets.reset_daily(now).await?;
        let mut state = self.load_state(now).await?;
        let totals_reset = state.apply_daily_reset(now);
        if totals_reset {
            let full = &self.config.modes.full_spectrum;
            for mode in ResearchMode::INDIVIDUAL {
                let mut ceiling =
                    self.config.modes.get(mode).backpressure_ceiling;
                if state.is_full_spectrum_enabled {
                    ceiling = ceiling.min(full.backpressure_ceiling);
                }
                state.clamp_backpressure(mode, ceiling);
            }
        }
        let report = DailyResetReport {
            providers,
            totals_reset,
        };
        if report.is_noop() {
            return Ok(report);
        }
        state.provider_quota_json =
            quota_snapshot(&self.stores.budgets.list().await?);
        state.updated_at = now;
        self.stores.state.save(&state).await?;
        info!(
            target: "research::budget",
            providers = ?report.providers,
            totals_reset,
            "daily reset applied"
        );
        self.emit(OrchestratorEventPayload::DailyReset {
            providers: report.providers.clone(),
            totals_reset,
        })
        .await;
        Ok(report)
    }

    /// Fail RUNNING jobs whose executing instance has gone quiet for longer
    /// than the executor timeout plus grace. Retry policy applies.
    pub async fn reap_stale_running(&self) -> Result<Vec<CompletionReport>> {
        let now = self.clock.now();
        let cutoff = now - self.config.executor.stale_after();
        let stale: Vec<ResearchJob> = self
            .stores
            .jobs
            .list(JobFilter::status(JobStatus::Running))
            .await?
            .into_iter()
            .filter(|job| job.started_at.unwrap_or(job.updated_at) < cutoff)
            .collect();

        let mut reports = Vec::with_capacity(stale.len());
        for job in stale {
            warn!(
                target: "research::runtime",
                job_id = %job.id,
                mode = %job.mode,
                started_at = ?job.started_at,
                "reaping orphaned running job"
            );
            reports.push(
                self.record_outcome(
                    job.id,
                    ExecutionOutcome::failed(REASON_LEASE_EXPIRED),
                )
                .await?,
            );
        }
        Ok(reports)
    }

    pub async fn purge_expired_fingerprints(&self) -> Result<u64> {
        let removed = self
            .stores
            .fingerprints
            .purge_expired(self.clock.now())
            .await?;
        if removed > 0 {
            info!(
                target: "research::dedup",
                removed,
                "expired fingerprints purged"
            );
        }
        Ok(removed)
    }

    pub async fn set_full_spectrum(
        &self,
        enabled: bool,
    ) -> Result<OrchestratorState> {
        let lease = self.lock_with_retry().await?;
        let result = self.set_full_spectrum_locked(enabled).await;
        self.release(&lease).await;
        result
    }

    async fn set_full_spectrum_locked(
        &self,
        enabled: bool,
    ) -> Result<OrchestratorState> {
        let now = self.clock.now();
        let mut state = self.load_state(now).await?;
        state.is_full_spectrum_enabled = enabled;
        state.updated_at = now;
        self.stores.state.save(&state).await?;
        info!(
            target: "research::scheduler",
            enabled,
            "full spectrum toggled"
        );
        Ok(state)
    }

    /// Read-only; no lock is taken.
    pub async fn snapshot(&self) -> Result<OrchestratorSnapshot> {
        let now = self.clock.now();
        let state = match self.stores.state.load().await? {
            Some(state) => state,
            None => OrchestratorState::new(
                self.config.full_spectrum_enabled,
                now,
            ),
        };
        let jobs = &self.stores.jobs;
        Ok(OrchestratorSnapshot {
            taken_at: now,
            instance_id: self.config.instance_id.clone(),
            modes: eligibility_report(&self.config.modes, &state, now),
            state,
            budgets: self.stores.budgets.list().await?,
            running: jobs.count_by_status(JobStatus::Running).await?,
            queued: jobs.count_by_status(JobStatus::Queued).await?,
            deferred: jobs.count_by_status(JobStatus::Deferred).await?,
            max_concurrent: self.config.max_concurrent,
        })
    }

    async fn load_state(&self, now: DateTime<Utc>) -> Result<OrchestratorState> {
        if let Some(state) = self.stores.state.load().await? {
            return Ok(state);
        }
        self.stores
            .state
            .init_if_absent(OrchestratorState::new(
                self.config.full_spectrum_enabled,
                now,
            ))
            .await
    }

    async fn try_lock(&self, now: DateTime<Utc>) -> Result<Option<LockLease>> {
        self.stores
            .lock
            .try_acquire(
                &self.config.lock.name,
                &self.config.instance_id,
                self.config.lock.lease_ttl(),
                now,
            )
            .await
    }

    /// Writes that must not be dropped wait a bounded time for the lease.
    async fn lock_with_retry(&self) -> Result<LockLease> {
        let deadline =
            tokio::time::Instant::now() + self.config.lock.acquire_timeout();
        loop {
            if let Some(lease) = self.try_lock(self.clock.now()).await? {
                return Ok(lease);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(OrchestratorError::LockUnavailable(format!(
                    "{} not acquired within {}ms",
                    self.config.lock.name, self.config.lock.acquire_timeout_ms
                )));
            }
            tokio::time::sleep(self.config.lock.retry_interval()).await;
        }
    }

    async fn release(&self, lease: &LockLease) {
        if let Err(error) = self.stores.lock.release(lease).await {
            warn!(
                target: "research::runtime",
                lock = %lease.name,
                error = %error,
                "failed to release orchestrator lease"
            );
        }
    }

    async fn status_changed(
        &self,
        job: &ResearchJob,
        from: Option<JobStatus>,
        reason: Option<String>,
    ) {
        self.emit(OrchestratorEventPayload::StatusChanged {
            job_id: job.id,
            mode: job.mode,
            from,
            to: job.status,
            reason,
        })
        .await;
    }

    async fn emit(&self, payload: OrchestratorEventPayload) {
        let event = OrchestratorEvent {
            meta: EventMeta::new(&self.config.instance_id, self.clock.now()),
            payload,
        };
        if let Err(error) = self.events.publish(event).await {
            debug!(
                target: "research::runtime",
                error = %error,
                "event publish failed"
            );
        }
    }
}

/// Estimated spend held by RUNNING jobs, per provider.
fn reservations(
    running: &[ResearchJob],
    classes: &CostClassPolicies,
) -> HashMap<String, f64> {
    let mut out: HashMap<String, f64> = HashMap::new();
    for job in running {
        let policy = classes.get(job.cost_class);
        *out.entry(policy.provider.clone()).or_default() +=
            policy.estimated_cost_usd;
    }
    out
}

/// Usage figures from executor diagnostics. Unusable costs are dropped so a
/// malformed report cannot wedge the job in RUNNING.
fn usage_of(
    job: &ResearchJob,
    diagnostics: Option<&ResearchDiagnostics>,
) -> JobUsage {
    let Some(diagnostics) = diagnostics else {
        return JobUsage::default();
    };
    let cost_usd = match diagnostics.cost_usd {
        Some(cost) if cost.is_finite() && cost >= 0.0 => Some(cost),
        Some(cost) => {
            warn!(
                target: "research::budget",
                job_id = %job.id,
                cost,
                "ignoring invalid reported cost"
            );
            None
        }
        None => None,
    };
    JobUsage {
        cost_usd,
        input_tokens: diagnostics.input_or_total(),
        output_tokens: diagnostics.output_tokens,
    }
}
