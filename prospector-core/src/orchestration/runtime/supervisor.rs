use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use prospector_model::{JobId, ResearchJob};
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{OrchestratorError, Result},
    orchestration::{
        config::RuntimeConfig,
        dispatcher::{ExecutionOutcome, ResearchDispatcher},
        orchestrator::{ResearchOrchestrator, TickOutcome},
    },
};

/// Failure message recorded for runs aborted by a process shutdown.
pub const REASON_SHUTDOWN: &str = "interrupted by shutdown";

struct InFlightJob {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// An outcome whose recording hit a transient error. Retried before every
/// tick and once more at shutdown.
struct UnrecordedOutcome {
    job_id: JobId,
    outcome: ExecutionOutcome,
}

/// State shared between the supervisor and the tasks it spawns.
struct RuntimeShared {
    orchestrator: Arc<ResearchOrchestrator>,
    dispatcher: Arc<ResearchDispatcher>,
    shutdown_token: CancellationToken,
    in_flight: Mutex<HashMap<JobId, InFlightJob>>,
    unrecorded: Mutex<Vec<UnrecordedOutcome>>,
}

impl RuntimeShared {
    /// Run a claimed job on its own task with a child cancellation token.
    async fn launch(self: &Arc<Self>, job: ResearchJob) {
        let token = self.shutdown_token.child_token();
        let mut in_flight = self.in_flight.lock().await;
        let shared = Arc::clone(self);
        let job_id = job.id;
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            shared.run(job, run_token).await;
            shared.in_flight.lock().await.remove(&job_id);
        });
        in_flight.insert(
            job_id,
            InFlightJob {
                token,
                handle: Some(handle),
            },
        );
    }

    async fn run(&self, job: ResearchJob, token: CancellationToken) {
        let outcome = match self.dispatcher.execute(&job, token).await {
            ExecutionOutcome::Cancelled { diagnostics }
                if self.shutdown_token.is_cancelled() =>
            {
                ExecutionOutcome::Failed {
                    message: REASON_SHUTDOWN.to_string(),
                    diagnostics,
                }
            }
            other => other,
        };
        let label = outcome.label();
        match self.orchestrator.record_outcome(job.id, outcome.clone()).await {
            Ok(report) => debug!(
                target: "research::runtime",
                job_id = %job.id,
                outcome = label,
                disposition = ?report.disposition,
                "job task finished"
            ),
            Err(error) if error.is_transient() => {
                warn!(
                    target: "research::runtime",
                    job_id = %job.id,
                    outcome = label,
                    error = %error,
                    "outcome not recorded; retrying on the next tick"
                );
                self.unrecorded.lock().await.push(UnrecordedOutcome {
                    job_id: job.id,
                    outcome,
                });
            }
            Err(error) => warn!(
                target: "research::runtime",
                job_id = %job.id,
                outcome = label,
                error = %error,
                "failed to record outcome"
            ),
        }
    }

    /// Retry outcomes that could not be recorded earlier. Transient failures
    /// stay queued; anything else is logged and dropped.
    async fn flush_unrecorded(&self) {
        let pending = std::mem::take(&mut *self.unrecorded.lock().await);
        if pending.is_empty() {
            return;
        }
        let mut kept = Vec::new();
        for entry in pending {
            match self
                .orchestrator
                .record_outcome(entry.job_id, entry.outcome.clone())
                .await
            {
                Ok(report) => info!(
                    target: "research::runtime",
                    job_id = %entry.job_id,
                    disposition = ?report.disposition,
                    "queued outcome recorded"
                ),
                Err(error) if error.is_transient() => {
                    debug!(
                        target: "research::runtime",
                        job_id = %entry.job_id,
                        error = %error,
                        "queued outcome still not recorded"
                    );
                    kept.push(entry);
                }
                Err(error) => warn!(
                    target: "research::runtime",
                    job_id = %entry.job_id,
                    error = %error,
                    "dropping queued outcome"
                ),
            }
        }
        self.unrecorded.lock().await.extend(kept);
    }
}

/// Drives the orchestrator inside one process: the tick loop, the daily
/// reset loop, the housekeeper and every in-flight job task.
pub struct OrchestratorRuntime {
    config: RuntimeConfig,
    shared: Arc<RuntimeShared>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for OrchestratorRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_handle_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        let in_flight = self
            .shared
            .in_flight
            .try_lock()
            .map(|jobs| jobs.len())
            .unwrap_or_default();
        f.debug_struct("OrchestratorRuntime")
            .field("config", &self.config)
            .field("orchestrator", &self.shared.orchestrator)
            .field("dispatcher", &self.shared.dispatcher)
            .field("worker_handle_count", &worker_handle_count)
            .field("in_flight", &in_flight)
            .field(
                "unrecorded",
                &self
                    .shared
                    .unrecorded
                    .try_lock()
                    .map(|queue| queue.len())
                    .unwrap_or_default(),
            )
            .field(
                "shutdown_cancelled",
                &self.shared.shutdown_token.is_cancelled(),
            )
            .finish()
    }
}

impl OrchestratorRuntime {
    pub fn new(
        config: RuntimeConfig,
        orchestrator: Arc<ResearchOrchestrator>,
        dispatcher: Arc<ResearchDispatcher>,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(RuntimeShared {
                orchestrator,
                dispatcher,
                shutdown_token: CancellationToken::new(),
                in_flight: Mutex::new(HashMap::new()),
                unrecorded: Mutex::new(Vec::new()),
            }),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn builder(config: RuntimeConfig) -> OrchestratorRuntimeBuilder {
        OrchestratorRuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> Arc<ResearchOrchestrator> {
        Arc::clone(&self.shared.orchestrator)
    }

    pub fn dispatcher(&self) -> Arc<ResearchDispatcher> {
        Arc::clone(&self.shared.dispatcher)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown_token.clone()
    }

    /// Spawn the background loops. Fails if already started or shut down.
    pub async fn start(&self) -> Result<()> {
        if self.shared.shutdown_token.is_cancelled() {
            return Err(OrchestratorError::Internal(
                "runtime already shut down".into(),
            ));
        }
        let mut handles = self.worker_handles.lock().await;
        if !handles.is_empty() {
            return Err(OrchestratorError::Internal(
                "runtime already started".into(),
            ));
        }
        handles.push(self.spawn_tick_loop());
        handles.push(self.spawn_daily_reset_loop());
        handles.push(self.spawn_housekeeper());
        info!(
            target: "research::runtime",
            tick_interval_ms = self.config.tick_interval_ms,
            "orchestrator runtime started"
        );
        Ok(())
    }

    /// Retry queued outcomes, then run one tick right away and launch
    /// whatever it claims.
    pub async fn tick_now(&self) -> Result<TickOutcome> {
        self.shared.flush_unrecorded().await;
        let outcome = self.shared.orchestrator.tick().await?;
        if let TickOutcome::Launched { job, .. } = &outcome {
            self.shared.launch(job.clone()).await;
        }
        Ok(outcome)
    }

    /// Cancel a job and abort its executor call if it runs in this process.
    pub async fn cancel(&self, job_id: JobId) -> Result<ResearchJob> {
        let job = self.shared.orchestrator.cancel(job_id).await?;
        if let Some(entry) = self.shared.in_flight.lock().await.get(&job_id) {
            entry.token.cancel();
        }
        Ok(job)
    }

    pub async fn in_flight(&self) -> Vec<JobId> {
        self.shared.in_flight.lock().await.keys().copied().collect()
    }

    /// Jobs whose outcome is waiting to be recorded.
    pub async fn unrecorded(&self) -> Vec<JobId> {
        self.shared
            .unrecorded
            .lock()
            .await
            .iter()
            .map(|entry| entry.job_id)
            .collect()
    }

    fn spawn_tick_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shared.shutdown_token.cancelled() => break,
                    _ = interval.tick() => {
                        shared.flush_unrecorded().await;
                        match shared.orchestrator.tick().await {
                            Ok(TickOutcome::Launched { job, .. }) => {
                                shared.launch(job).await;
                            }
                            Ok(_) => {}
                            Err(error) => warn!(
                                target: "research::runtime",
                                error = %error,
                                "tick failed"
                            ),
                        }
                    }
                }
            }
            debug!(target: "research::runtime", "tick loop stopped");
        })
    }

    fn spawn_daily_reset_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let period = Duration::from_millis(
            self.config.daily_reset_check_interval_ms.max(1),
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shared.shutdown_token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(error) =
                            shared.orchestrator.reset_daily().await
                        {
                            warn!(
                                target: "research::runtime",
                                error = %error,
                                "daily reset failed"
                            );
                        }
                    }
                }
            }
        })
    }

    fn spawn_housekeeper(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let period =
            Duration::from_millis(self.config.housekeeper_interval_ms.max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.shutdown_token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        if let Err(error) =
                            shared.orchestrator.reap_stale_running().await
                        {
                            warn!(
                                target: "research::runtime",
                                error = %error,
                                "stale job reaper failed"
                            );
                        }
                        if let Err(error) = shared
                            .orchestrator
                            .purge_expired_fingerprints()
                            .await
                        {
                            warn!(
                                target: "research::runtime",
                                error = %error,
                                "fingerprint purge failed"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Stop the loops, abort in-flight executor calls and wait (bounded)
    /// for their outcomes to be recorded.
    pub async fn shutdown(&self) -> Result<()> {
        info!(
            target: "research::runtime",
            "initiating orchestrator runtime shutdown"
        );
        self.shared.shutdown_token.cancel();

        let limit = Duration::from_secs(self.config.shutdown_timeout_secs);
        let mut handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        {
            let mut in_flight = self.shared.in_flight.lock().await;
            handles.extend(
                in_flight.values_mut().filter_map(|job| job.handle.take()),
            );
        }

        for handle in handles {
            match tokio::time::timeout(limit, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(
                    target: "research::runtime",
                    error = ?error,
                    "runtime task failed"
                ),
                Err(_) => warn!(
                    target: "research::runtime",
                    "runtime task timed out during shutdown"
                ),
            }
        }
        self.shared.flush_unrecorded().await;
        let lost = self.shared.unrecorded.lock().await.len();
        if lost > 0 {
            warn!(
                target: "research::runtime",
                outcomes = lost,
                "outcomes left unrecorded at shutdown"
            );
        }
        info!(target: "research::runtime", "orchestrator runtime stopped");
        Ok(())
    }
}

/// Assembles an [`OrchestratorRuntime`] from its parts.
pub struct OrchestratorRuntimeBuilder {
    config: RuntimeConfig,
    orchestrator: Option<Arc<ResearchOrchestrator>>,
    dispatcher: Option<Arc<ResearchDispatcher>>,
}

impl fmt::Debug for OrchestratorRuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorRuntimeBuilder")
            .field("config", &self.config)
            .field("orchestrator_set", &self.orchestrator.is_some())
            .field("dispatcher_set", &self.dispatcher.is_some())
            .finish()
    }
}

impl OrchestratorRuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            orchestrator: None,
            dispatcher: None,
        }
    }

    pub fn with_orchestrator(
        mut self,
        orchestrator: Arc<ResearchOrchestrator>,
    ) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<ResearchDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<OrchestratorRuntime> {
        let orchestrator = self.orchestrator.ok_or_else(|| {
            OrchestratorError::Internal(
                "orchestrator dependency missing".into(),
            )
        })?;
        let dispatcher = self.dispatcher.ok_or_else(|| {
            OrchestratorError::Internal("dispatcher dependency missing".into())
        })?;
        Ok(OrchestratorRuntime::new(self.config, orchestrator, dispatcher))
    }
}
