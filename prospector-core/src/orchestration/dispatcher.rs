use std::{fmt, sync::Arc, time::Duration};

use futures::future::join_all;
use prospector_model::{
    ResearchDiagnostics, ResearchJob, ResearchMode, StrategyCandidate,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use super::{
    clock::Clock,
    config::{ExecutorConfig, ModePolicies},
    context::MarketRegimeSource,
    executor::{
        ExecutorError, ResearchExecutor, ResearchOutput, ResearchRequest,
    },
};
use crate::persistence::FingerprintStore;

/// What a finished run reports back to the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded {
        candidates: Vec<StrategyCandidate>,
        diagnostics: ResearchDiagnostics,
    },
    Failed {
        message: String,
        diagnostics: Option<ResearchDiagnostics>,
    },
    /// The run was abandoned. Usage is reported when the executor managed
    /// to return it before the abort.
    Cancelled {
        diagnostics: Option<ResearchDiagnostics>,
    },
}

impl ExecutionOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionOutcome::Failed {
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn diagnostics(&self) -> Option<&ResearchDiagnostics> {
        match self {
            ExecutionOutcome::Succeeded { diagnostics, .. } => Some(diagnostics),
            ExecutionOutcome::Failed { diagnostics, .. }
            | ExecutionOutcome::Cancelled { diagnostics } => {
                diagnostics.as_ref()
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Succeeded { .. } => "succeeded",
            ExecutionOutcome::Failed { .. } => "failed",
            ExecutionOutcome::Cancelled { .. } => "cancelled",
        }
    }
}

/// Runs a claimed job against the research executor. Holds no lock: the
/// orchestrator claims the job before and records the outcome after.
#[derive(Clone)]
pub struct ResearchDispatcher {
    executor: Arc<dyn ResearchExecutor>,
    fingerprints: Arc<dyn FingerprintStore>,
    regime: Arc<dyn MarketRegimeSource>,
    clock: Arc<dyn Clock>,
    modes: ModePolicies,
    timeout: Duration,
    history_limit: usize,
}

impl fmt::Debug for ResearchDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResearchDispatcher")
            .field("executor", &self.executor)
            .field("regime", &self.regime)
            .field("timeout", &self.timeout)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl ResearchDispatcher {
    pub fn new(
        executor: Arc<dyn ResearchExecutor>,
        fingerprints: Arc<dyn FingerprintStore>,
        regime: Arc<dyn MarketRegimeSource>,
        clock: Arc<dyn Clock>,
        modes: ModePolicies,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            executor,
            fingerprints,
            regime,
            clock,
            modes,
            timeout: config.timeout(),
            history_limit: config.history_limit,
        }
    }

    /// Override the per-call wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `job`, fanning a full-spectrum job out to its sub-modes
    /// concurrently. The job fails only when every sub-call fails.
    pub async fn execute(
        &self,
        job: &ResearchJob,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        let span = info_span!(
            target: "research::dispatch",
            "research_job",
            job_id = %job.id,
            mode = %job.mode,
            retry = job.retry_count,
        );
        async move {
            let shared = self.shared_context(job).await;
            let calls = job.mode.sub_modes().iter().map(|sub| {
                let request = ResearchRequest {
                    job_id: job.id,
                    mode: *sub,
                    context_json: self.context_for(job, *sub, &shared),
                };
                self.call(*sub, request)
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(target: "research::dispatch", "run cancelled");
                    ExecutionOutcome::Cancelled { diagnostics: None }
                }
                results = join_all(calls) => merge(job.mode, results),
            }
        }
        .instrument(span)
        .await
    }

    async fn call(
        &self,
        mode: ResearchMode,
        request: ResearchRequest,
    ) -> (ResearchMode, Result<ResearchOutput, ExecutorError>) {
        let call = self.executor.execute(request);
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout(self.timeout)),
        };
        if let Err(error) = &result {
            warn!(
                target: "research::dispatch",
                sub_mode = %mode,
                error = %error,
                "executor call failed"
            );
        }
        (mode, result)
    }

    async fn shared_context(&self, job: &ResearchJob) -> SharedContext {
        let recent = match self
            .fingerprints
            .recent(self.history_limit, self.clock.now())
            .await
        {
            Ok(records) => records
                .into_iter()
                .map(|fp| Value::String(fp.fingerprint_hash))
                .collect(),
            Err(error) => {
                warn!(
                    target: "research::dispatch",
                    job_id = %job.id,
                    error = %error,
                    "fingerprint history unavailable"
                );
                Vec::new()
            }
        };
        SharedContext {
            market_regime: self.regime.current_regime().await,
            recent_fingerprints: recent,
        }
    }

    fn context_for(
        &self,
        job: &ResearchJob,
        mode: ResearchMode,
        shared: &SharedContext,
    ) -> Value {
        let sub_modes: Vec<&str> =
            job.mode.sub_modes().iter().map(|m| m.as_str()).collect();
        json!({
            "jobId": job.id,
            "mode": mode.as_str(),
            "parentMode": job.mode.as_str(),
            "subModes": sub_modes,
            "parameters": self.modes.get(mode).parameters.clone(),
            "retryCount": job.retry_count,
            "lastError": job.error_message,
            "marketRegime": shared.market_regime.clone().unwrap_or(Value::Null),
            "recentFingerprints": shared.recent_fingerprints.clone(),
        })
    }
}

struct SharedContext {
    market_regime: Option<Value>,
    recent_fingerprints: Vec<Value>,
}

fn merge(
    mode: ResearchMode,
    results: Vec<(ResearchMode, Result<ResearchOutput, ExecutorError>)>,
) -> ExecutionOutcome {
    let mut candidates = Vec::new();
    let mut diagnostics = ResearchDiagnostics::default();
    let mut errors = Vec::new();
    let mut any_ok = false;

    for (sub, result) in results {
        match result {
            Ok(output) => {
                any_ok = true;
                candidates.extend(output.candidates);
                diagnostics = diagnostics.merge(output.diagnostics);
            }
            Err(error) if mode.is_meta() => {
                errors.push(format!("{sub}: {error}"));
            }
            Err(error) => errors.push(error.to_string()),
        }
    }

    if any_ok {
        ExecutionOutcome::Succeeded {
            candidates,
            diagnostics,
        }
    } else {
        ExecutionOutcome::failed(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        orchestration::{
            clock::ManualClock, context::StaticRegime,
            executor::MockResearchExecutor,
        },
        persistence::memory::InMemoryFingerprintStore,
    };
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use prospector_model::NewResearchJob;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap(),
        ))
    }

    fn idea(name: &str) -> StrategyCandidate {
        StrategyCandidate {
            name: name.into(),
            archetype_name: "Breakout".into(),
            hypothesis: format!("{name} hypothesis"),
            rules_json: json!({"name": name}),
        }
    }

    fn dispatcher(executor: Arc<dyn ResearchExecutor>) -> ResearchDispatcher {
        let mut modes = ModePolicies::default();
        modes.contrarian_scan.parameters = json!({"lookbackDays": 14});
        ResearchDispatcher::new(
            executor,
            Arc::new(InMemoryFingerprintStore::default()),
            Arc::new(StaticRegime(Some(json!({"regime": "risk_off"})))),
            clock(),
            modes,
            &ExecutorConfig::default(),
        )
    }

    #[tokio::test]
    async fn single_mode_forwards_context() {
        let mut executor = MockResearchExecutor::new();
        executor
            .expect_execute()
            .withf(|req| {
                req.mode == ResearchMode::ContrarianScan
                    && req.context_json["parameters"]["lookbackDays"] == 14
                    && req.context_json["marketRegime"]["regime"] == "risk_off"
                    && req.context_json["retryCount"] == 0
            })
            .times(1)
            .returning(|_| {
                Ok(ResearchOutput {
                    candidates: vec![idea("a")],
                    diagnostics: ResearchDiagnostics {
                        cost_usd: Some(0.4),
                        ..Default::default()
                    },
                })
            });

        let job = NewResearchJob::new(ResearchMode::ContrarianScan, 60, 2)
            .build(clock().now());
        let outcome = dispatcher(Arc::new(executor))
            .execute(&job, CancellationToken::new())
            .await;
        match outcome {
            ExecutionOutcome::Succeeded {
                candidates,
                diagnostics,
            } => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(diagnostics.cost_usd, Some(0.4));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_spectrum_survives_partial_failure() {
        let mut executor = MockResearchExecutor::new();
        executor.expect_execute().times(3).returning(|req| {
            if req.mode == ResearchMode::DeepReasoning {
                return Err(ExecutorError::Rejected("quota".into()));
            }
            Ok(ResearchOutput {
                candidates: vec![idea(req.mode.as_str())],
                diagnostics: ResearchDiagnostics {
                    input_tokens: Some(100),
                    output_tokens: Some(20),
                    cost_usd: Some(1.5),
                    ..Default::default()
                },
            })
        });

        let job = NewResearchJob::new(ResearchMode::FullSpectrum, 90, 1)
            .build(clock().now());
        let outcome = dispatcher(Arc::new(executor))
            .execute(&job, CancellationToken::new())
            .await;
        let ExecutionOutcome::Succeeded {
            candidates,
            diagnostics,
        } = outcome
        else {
            panic!("expected success");
        };
        assert_eq!(candidates.len(), 2);
        assert_eq!(diagnostics.input_tokens, Some(200));
        assert_eq!(diagnostics.cost_usd, Some(3.0));
    }

    #[tokio::test]
    async fn full_spectrum_fails_when_every_sub_call_fails() {
        let mut executor = MockResearchExecutor::new();
        executor
            .expect_execute()
            .times(3)
            .returning(|_| Err(ExecutorError::Transport("refused".into())));

        let job = NewResearchJob::new(ResearchMode::FullSpectrum, 90, 1)
            .build(clock().now());
        let outcome = dispatcher(Arc::new(executor))
            .execute(&job, CancellationToken::new())
            .await;
        match outcome {
            ExecutionOutcome::Failed { message, .. } => {
                assert!(message.contains("CONTRARIAN_SCAN: executor transport"));
                assert_eq!(message.matches("refused").count(), 3);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[derive(Debug)]
    struct StalledExecutor;

    #[async_trait]
    impl ResearchExecutor for StalledExecutor {
        async fn execute(
            &self,
            _request: ResearchRequest,
        ) -> Result<ResearchOutput, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ResearchOutput::default())
        }
    }

    #[tokio::test]
    async fn slow_executor_times_out() {
        let job = NewResearchJob::new(ResearchMode::SentimentBurst, 40, 1)
            .build(clock().now());
        let outcome = dispatcher(Arc::new(StalledExecutor))
            .with_timeout(Duration::from_millis(20))
            .execute(&job, CancellationToken::new())
            .await;
        assert_eq!(
            outcome,
            ExecutionOutcome::failed("executor timed out after 20ms")
        );
    }

    #[tokio::test]
    async fn cancellation_aborts_the_call() {
        let job = NewResearchJob::new(ResearchMode::SentimentBurst, 40, 1)
            .build(clock().now());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let outcome = dispatcher(Arc::new(StalledExecutor))
            .execute(&job, token)
            .await;
        assert_eq!(outcome, ExecutionOutcome::Cancelled { diagnostics: None });
    }
}
