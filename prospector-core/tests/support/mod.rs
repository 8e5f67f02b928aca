#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use prospector_core::{
    orchestration::{
        ExecutionOutcome, ManualClock, OrchestratorConfig, ResearchOrchestrator,
        runtime::InProcEventBus, sink::InMemoryCandidateSink,
    },
    persistence::{OrchestratorStores, memory::in_memory_stores},
};
use prospector_model::{
    JobId, ResearchDiagnostics, ResearchJob, ResearchMode, StrategyCandidate,
};
use serde_json::json;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

/// Defaults with a short lease and lock wait so contention tests stay fast.
pub fn config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.instance_id = "test-instance".to_string();
    config.lock.lease_ttl_secs = 1;
    config.lock.acquire_timeout_ms = 1_000;
    config.lock.retry_interval_ms = 5;
    config
}

/// Config where only `mode` is auto-seeded.
pub fn only(mode: ResearchMode) -> OrchestratorConfig {
    let mut config = config();
    for other in ResearchMode::INDIVIDUAL {
        config.modes.get_mut(other).enabled = other == mode;
    }
    config
}

pub struct Harness {
    pub orchestrator: Arc<ResearchOrchestrator>,
    pub clock: ManualClock,
    pub stores: OrchestratorStores,
    pub sink: Arc<InMemoryCandidateSink>,
    pub bus: Arc<InProcEventBus>,
}

impl Harness {
    pub async fn new(config: OrchestratorConfig) -> Self {
        let clock = ManualClock::new(t0());
        let stores = in_memory_stores();
        let sink = Arc::new(InMemoryCandidateSink::default());
        let bus = Arc::new(InProcEventBus::new(256));
        let orchestrator = Arc::new(
            ResearchOrchestrator::new(
                config,
                stores.clone(),
                Arc::new(clock.clone()),
                bus.clone(),
                sink.clone(),
            )
            .expect("valid config"),
        );
        orchestrator.bootstrap().await.expect("bootstrap");
        Self {
            orchestrator,
            clock,
            stores,
            sink,
            bus,
        }
    }

    pub async fn job(&self, id: JobId) -> ResearchJob {
        self.orchestrator
            .job(id)
            .await
            .expect("job lookup")
            .expect("job exists")
    }

    pub async fn launch(&self) -> ResearchJob {
        let outcome = self.orchestrator.tick().await.expect("tick");
        outcome
            .launched()
            .cloned()
            .unwrap_or_else(|| panic!("expected a launch, got {outcome:?}"))
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }
}

pub fn candidate(name: &str, hypothesis: &str) -> StrategyCandidate {
    StrategyCandidate {
        name: name.to_string(),
        archetype_name: "mean_reversion".to_string(),
        hypothesis: hypothesis.to_string(),
        rules_json: json!({ "entry": { "rsi_below": 30 }, "exit": "rsi > 55" }),
    }
}

pub fn cost(cost_usd: f64) -> ResearchDiagnostics {
    ResearchDiagnostics {
        input_tokens: Some(1_200),
        output_tokens: Some(300),
        tokens_used: None,
        cost_usd: Some(cost_usd),
    }
}

pub fn succeeded(
    candidates: Vec<StrategyCandidate>,
    cost_usd: f64,
) -> ExecutionOutcome {
    ExecutionOutcome::Succeeded {
        candidates,
        diagnostics: cost(cost_usd),
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
