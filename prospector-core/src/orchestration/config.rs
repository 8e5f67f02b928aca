use std::time::Duration;

use prospector_model::{CostClass, ResearchMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Global knobs that tune orchestrator behaviour.
///
/// Every field carries a default so deployments only spell out what they
/// override.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Identity used as the lease holder and in emitted events.
    pub instance_id: String,
    /// Upper bound on simultaneously RUNNING jobs.
    pub max_concurrent: usize,
    /// Initial value of the full-spectrum toggle when the state row is
    /// first created. Later changes go through the state row.
    pub full_spectrum_enabled: bool,
    /// Cadence, priority and backpressure policy per research mode.
    pub modes: ModePolicies,
    /// Provider and launch estimate per cost class.
    pub cost_classes: CostClassPolicies,
    /// Provider ceilings seeded at bootstrap.
    pub budgets: Vec<BudgetSeed>,
    /// Retry backoff for failed jobs.
    pub retry: RetryConfig,
    /// Distributed lease guarding every state mutation.
    pub lock: LockConfig,
    /// Research executor call limits.
    pub executor: ExecutorConfig,
    /// Candidate fingerprint retention.
    pub dedup: DedupConfig,
    /// Background loop cadence.
    pub runtime: RuntimeConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            instance_id: "prospector".to_string(),
            max_concurrent: 3,
            full_spectrum_enabled: false,
            modes: ModePolicies::default(),
            cost_classes: CostClassPolicies::default(),
            budgets: vec![BudgetSeed::default()],
            retry: RetryConfig::default(),
            lock: LockConfig::default(),
            executor: ExecutorConfig::default(),
            dedup: DedupConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings the scheduler cannot honour. Softer guard rails are
    /// reported by the config loader as warnings.
    pub fn validate(&self) -> Result<()> {
        if self.instance_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "instance_id must not be empty".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        for mode in ResearchMode::all() {
            self.modes.get(*mode).validate(*mode)?;
        }
        for class in [CostClass::Low, CostClass::Medium, CostClass::High] {
            let policy = self.cost_classes.get(class);
            if policy.provider.trim().is_empty() {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "cost class {class} has no provider"
                )));
            }
            if !policy.estimated_cost_usd.is_finite()
                || policy.estimated_cost_usd < 0.0
            {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "cost class {class} estimate must be a non-negative number"
                )));
            }
        }
        for seed in &self.budgets {
            if !(seed.daily_budget >= 0.0 && seed.period_budget >= 0.0) {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "budget for provider {} must be non-negative",
                    seed.provider
                )));
            }
        }
        if self.lock.lease_ttl_secs == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "lock.lease_ttl_secs must be at least 1".into(),
            ));
        }
        // A lease left behind by a crashed holder must expire within one
        // acquisition wait.
        if self.lock.acquire_timeout_ms
            < self.lock.lease_ttl_secs.saturating_mul(1_000)
        {
            return Err(OrchestratorError::InvalidConfig(format!(
                "lock.acquire_timeout_ms ({}) must cover lock.lease_ttl_secs \
                 ({}s)",
                self.lock.acquire_timeout_ms, self.lock.lease_ttl_secs
            )));
        }
        if self.executor.timeout_secs == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "executor.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Scheduling policy for one research mode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModePolicy {
    /// Disabled modes are never auto-seeded and their queued jobs wait.
    pub enabled: bool,
    /// Minimum time between two launches of the mode.
    pub cooldown_secs: u64,
    /// Minute-of-hour offsets at which launches may start. Empty means the
    /// cooldown alone decides.
    pub aligned_minutes: Vec<u32>,
    /// Width of each aligned window in minutes.
    pub aligned_window_minutes: u32,
    /// Priority given to auto-seeded jobs and to enqueues without one.
    pub priority: i32,
    /// Backpressure above this parks the mode.
    pub backpressure_ceiling: u32,
    /// Extra cooldown per backpressure point; defaults to the cooldown.
    pub backpressure_step_secs: Option<u64>,
    /// Retry budget for jobs of this mode.
    pub max_retries: u32,
    /// Forwarded verbatim to the executor in the request context.
    pub parameters: Value,
}

impl Default for ModePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: 60 * 60,
            aligned_minutes: Vec::new(),
            aligned_window_minutes: 10,
            priority: 50,
            backpressure_ceiling: 4,
            backpressure_step_secs: None,
            max_retries: 2,
            parameters: Value::Object(Default::default()),
        }
    }
}

impl ModePolicy {
    pub fn cooldown(&self) -> chrono::Duration {
        secs(self.cooldown_secs)
    }

    pub fn backpressure_step(&self) -> chrono::Duration {
        secs(self.backpressure_step_secs.unwrap_or(self.cooldown_secs))
    }

    /// Cooldown stretched by `backpressure` steps.
    pub fn effective_cooldown(&self, backpressure: u32) -> chrono::Duration {
        let step = self.backpressure_step_secs.unwrap_or(self.cooldown_secs);
        secs(
            self.cooldown_secs
                .saturating_add(step.saturating_mul(u64::from(backpressure))),
        )
    }

    pub fn is_parked(&self, backpressure: u32) -> bool {
        backpressure > self.backpressure_ceiling
    }

    pub fn is_aligned(&self) -> bool {
        !self.aligned_minutes.is_empty()
    }

    fn validate(&self, mode: ResearchMode) -> Result<()> {
        if let Some(bad) = self.aligned_minutes.iter().find(|m| **m >= 60) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{mode}: aligned minute {bad} is outside 0..60"
            )));
        }
        if self.is_aligned() && self.aligned_window_minutes == 0 {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{mode}: aligned_window_minutes must be at least 1"
            )));
        }
        Ok(())
    }
}

/// Durations are clamped to a century so timestamp arithmetic cannot
/// overflow on absurd settings.
fn secs(value: u64) -> chrono::Duration {
    const CENTURY_SECS: u64 = 100 * 365 * 24 * 60 * 60;
    chrono::Duration::seconds(value.min(CENTURY_SECS) as i64)
}

/// Per-mode policies. Partial documents are layered over each mode's own
/// defaults, so overriding one knob keeps the rest of that mode's tuning.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(from = "ModePoliciesPatch")]
pub struct ModePolicies {
    pub contrarian_scan: ModePolicy,
    pub sentiment_burst: ModePolicy,
    pub deep_reasoning: ModePolicy,
    pub full_spectrum: ModePolicy,
}

impl Default for ModePolicies {
    fn default() -> Self {
        Self {
            contrarian_scan: ModePolicy {
                cooldown_secs: 2 * 60 * 60,
                priority: 60,
                backpressure_ceiling: 4,
                ..ModePolicy::default()
            },
            sentiment_burst: ModePolicy {
                cooldown_secs: 30 * 60,
                priority: 40,
                backpressure_ceiling: 6,
                ..ModePolicy::default()
            },
            deep_reasoning: ModePolicy {
                cooldown_secs: 12 * 60 * 60,
                priority: 80,
                backpressure_ceiling: 2,
                ..ModePolicy::default()
            },
            full_spectrum: ModePolicy {
                cooldown_secs: 6 * 60 * 60,
                priority: 90,
                backpressure_ceiling: 2,
                ..ModePolicy::default()
            },
        }
    }
}

impl ModePolicies {
    pub fn get(&self, mode: ResearchMode) -> &ModePolicy {
        match mode {
            ResearchMode::ContrarianScan => &self.contrarian_scan,
            ResearchMode::SentimentBurst => &self.sentiment_burst,
            ResearchMode::DeepReasoning => &self.deep_reasoning,
            ResearchMode::FullSpectrum => &self.full_spectrum,
        }
    }

    pub fn get_mut(&mut self, mode: ResearchMode) -> &mut ModePolicy {
        match mode {
            ResearchMode::ContrarianScan => &mut self.contrarian_scan,
            ResearchMode::SentimentBurst => &mut self.sentiment_burst,
            ResearchMode::DeepReasoning => &mut self.deep_reasoning,
            ResearchMode::FullSpectrum => &mut self.full_spectrum,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModePolicyPatch {
    enabled: Option<bool>,
    cooldown_secs: Option<u64>,
    aligned_minutes: Option<Vec<u32>>,
    aligned_window_minutes: Option<u32>,
    priority: Option<i32>,
    backpressure_ceiling: Option<u32>,
    backpressure_step_secs: Option<u64>,
    max_retries: Option<u32>,
    parameters: Option<Value>,
}

impl ModePolicyPatch {
    fn apply(self, mut base: ModePolicy) -> ModePolicy {
        if let Some(v) = self.enabled {
            base.enabled = v;
        }
        if let Some(v) = self.cooldown_secs {
            base.cooldown_secs = v;
        }
        if let Some(v) = self.aligned_minutes {
            base.aligned_minutes = v;
        }
        if let Some(v) = self.aligned_window_minutes {
            base.aligned_window_minutes = v;
        }
        if let Some(v) = self.priority {
            base.priority = v;
        }
        if let Some(v) = self.backpressure_ceiling {
            base.backpressure_ceiling = v;
        }
        if self.backpressure_step_secs.is_some() {
            base.backpressure_step_secs = self.backpressure_step_secs;
        }
        if let Some(v) = self.max_retries {
            base.max_retries = v;
        }
        if let Some(v) = self.parameters {
            base.parameters = v;
        }
        base
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModePoliciesPatch {
    contrarian_scan: ModePolicyPatch,
    sentiment_burst: ModePolicyPatch,
    deep_reasoning: ModePolicyPatch,
    full_spectrum: ModePolicyPatch,
}

impl From<ModePoliciesPatch> for ModePolicies {
    fn from(patch: ModePoliciesPatch) -> Self {
        let base = ModePolicies::default();
        Self {
            contrarian_scan: patch.contrarian_scan.apply(base.contrarian_scan),
            sentiment_burst: patch.sentiment_burst.apply(base.sentiment_burst),
            deep_reasoning: patch.deep_reasoning.apply(base.deep_reasoning),
            full_spectrum: patch.full_spectrum.apply(base.full_spectrum),
        }
    }
}

/// Which provider pays for a cost class and what a launch is expected to
/// cost.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CostClassPolicy {
    pub provider: String,
    pub estimated_cost_usd: f64,
}

impl Default for CostClassPolicy {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            estimated_cost_usd: 1.0,
        }
    }
}

pub const DEFAULT_PROVIDER: &str = "default";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(from = "CostClassPoliciesPatch")]
pub struct CostClassPolicies {
    pub low: CostClassPolicy,
    pub medium: CostClassPolicy,
    pub high: CostClassPolicy,
}

impl Default for CostClassPolicies {
    fn default() -> Self {
        Self {
            low: CostClassPolicy {
                estimated_cost_usd: 0.25,
                ..CostClassPolicy::default()
            },
            medium: CostClassPolicy {
                estimated_cost_usd: 1.0,
                ..CostClassPolicy::default()
            },
            high: CostClassPolicy {
                estimated_cost_usd: 4.0,
                ..CostClassPolicy::default()
            },
        }
    }
}

impl CostClassPolicies {
    pub fn get(&self, class: CostClass) -> &CostClassPolicy {
        match class {
            CostClass::Low => &self.low,
            CostClass::Medium => &self.medium,
            CostClass::High => &self.high,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CostClassPatch {
    provider: Option<String>,
    estimated_cost_usd: Option<f64>,
}

impl CostClassPatch {
    fn apply(self, base: CostClassPolicy) -> CostClassPolicy {
        CostClassPolicy {
            provider: self.provider.unwrap_or(base.provider),
            estimated_cost_usd: self
                .estimated_cost_usd
                .unwrap_or(base.estimated_cost_usd),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CostClassPoliciesPatch {
    low: CostClassPatch,
    medium: CostClassPatch,
    high: CostClassPatch,
}

impl From<CostClassPoliciesPatch> for CostClassPolicies {
    fn from(patch: CostClassPoliciesPatch) -> Self {
        let base = CostClassPolicies::default();
        Self {
            low: patch.low.apply(base.low),
            medium: patch.medium.apply(base.medium),
            high: patch.high.apply(base.high),
        }
    }
}

/// Ceilings written to the budget ledger at bootstrap.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetSeed {
    pub provider: String,
    pub daily_budget: f64,
    pub period_budget: f64,
}

impl Default for BudgetSeed {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            daily_budget: 50.0,
            period_budget: 1_000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryConfig {
    /// Exponential delay before retry number `attempt` (1-based), capped.
    pub fn delay_for(&self, attempt: u32) -> chrono::Duration {
        if attempt == 0 {
            return chrono::Duration::zero();
        }
        let exp = attempt.saturating_sub(1).min(30) as i32;
        let scaled = (self.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.backoff_max_ms as f64).max(0.0);
        chrono::Duration::milliseconds(capped as i64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 60_000,
            backoff_max_ms: 30 * 60 * 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    /// Fixed singleton key shared by every instance.
    pub name: String,
    /// Lease length in seconds; expired leases are taken over.
    pub lease_ttl_secs: u64,
    /// How long outcome recording and cancellation wait for the lease.
    /// Must be at least the lease TTL.
    pub acquire_timeout_ms: u64,
    /// Pause between acquisition attempts while waiting.
    pub retry_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: "research-orchestrator".to_string(),
            lease_ttl_secs: 15,
            acquire_timeout_ms: 20_000,
            retry_interval_ms: 50,
        }
    }
}

impl LockConfig {
    pub fn lease_ttl(&self) -> chrono::Duration {
        secs(self.lease_ttl_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Wall-clock limit for one executor call.
    pub timeout_secs: u64,
    /// Extra slack before a RUNNING job is presumed orphaned.
    pub stale_grace_secs: u64,
    /// Recent fingerprints forwarded as prior candidate history.
    pub history_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            stale_grace_secs: 300,
            history_limit: 50,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Age after which a RUNNING job is reaped.
    pub fn stale_after(&self) -> chrono::Duration {
        secs(self.timeout_secs.saturating_add(self.stale_grace_secs))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Fingerprint lifetime. `None` keeps fingerprints forever.
    pub fingerprint_ttl_secs: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fingerprint_ttl_secs: Some(30 * 24 * 60 * 60),
        }
    }
}

impl DedupConfig {
    pub fn ttl(&self) -> Option<chrono::Duration> {
        self.fingerprint_ttl_secs.map(secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_interval_ms: u64,
    pub daily_reset_check_interval_ms: u64,
    pub housekeeper_interval_ms: u64,
    pub event_channel_capacity: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 60_000,
            daily_reset_check_interval_ms: 5 * 60_000,
            housekeeper_interval_ms: 10 * 60_000,
            event_channel_capacity: 1_024,
            shutdown_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let retry = RetryConfig {
            backoff_base_ms: 1_000,
            backoff_max_ms: 5_000,
        };
        assert_eq!(retry.delay_for(0), chrono::Duration::zero());
        assert_eq!(retry.delay_for(1), chrono::Duration::seconds(1));
        assert_eq!(retry.delay_for(2), chrono::Duration::seconds(2));
        assert_eq!(retry.delay_for(3), chrono::Duration::seconds(4));
        assert_eq!(retry.delay_for(4), chrono::Duration::seconds(5));
        assert_eq!(retry.delay_for(40), chrono::Duration::seconds(5));
    }

    #[test]
    fn step_defaults_to_cooldown() {
        let policies = ModePolicies::default();
        let sentiment = policies.get(ResearchMode::SentimentBurst);
        assert_eq!(sentiment.backpressure_step(), sentiment.cooldown());
        let custom = ModePolicy {
            backpressure_step_secs: Some(90),
            ..sentiment.clone()
        };
        assert_eq!(custom.backpressure_step(), chrono::Duration::seconds(90));
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let parsed: OrchestratorConfig = serde_json::from_value(
            serde_json::json!({
                "max_concurrent": 5,
                "modes": { "sentiment_burst": { "cooldown_secs": 900 } }
            }),
        )
        .unwrap();
        assert_eq!(parsed.max_concurrent, 5);
        assert_eq!(parsed.modes.sentiment_burst.cooldown_secs, 900);
        assert_eq!(parsed.modes.sentiment_burst.priority, 40);
        assert_eq!(parsed.modes.sentiment_burst.backpressure_ceiling, 6);
        assert_eq!(parsed.modes.deep_reasoning.priority, 80);
        assert_eq!(parsed.cost_classes.low.estimated_cost_usd, 0.25);
        assert_eq!(parsed.lock.name, "research-orchestrator");
    }

    #[test]
    fn out_of_range_alignment_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.modes.sentiment_burst.aligned_minutes = vec![0, 75];
        assert!(config.validate().is_err());
    }

    #[test]
    fn lock_wait_must_outlast_the_lease() {
        let mut config = OrchestratorConfig::default();
        config.lock.lease_ttl_secs = 15;
        config.lock.acquire_timeout_ms = 5_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lock.acquire_timeout_ms"), "{err}");

        config.lock.acquire_timeout_ms = 15_000;
        config.validate().unwrap();
    }
}
