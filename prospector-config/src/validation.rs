//! Guard rails that flag surprising but workable settings.

use std::{collections::HashSet, fmt};

use prospector_core::orchestration::OrchestratorConfig;
use prospector_model::{CostClass, ResearchMode};
use serde::Serialize;

use crate::models::Config;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ConfigWarnings(Vec<ConfigWarning>);

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.0.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.0.iter()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.iter().any(|w| w.message.contains(needle))
    }
}

/// Below this a sentiment burst would hammer the provider.
const MIN_SENTIMENT_COOLDOWN_SECS: u64 = 5 * 60;

pub(crate) fn check(config: &Config, warnings: &mut ConfigWarnings) {
    if config.database.url.is_none() {
        warnings.push_with_hint(
            "no database configured; only in-memory stores are available",
            "set DATABASE_URL or [database].url",
        );
    }
    if config.executor.url.is_none() {
        warnings.push_with_hint(
            "no research executor endpoint configured",
            "set RESEARCH_EXECUTOR_URL or [executor].url",
        );
    }
    check_orchestrator(&config.orchestrator, warnings);
}

fn check_orchestrator(config: &OrchestratorConfig, warnings: &mut ConfigWarnings) {
    let seeded: HashSet<&str> = config
        .budgets
        .iter()
        .map(|seed| seed.provider.as_str())
        .collect();
    for class in [CostClass::Low, CostClass::Medium, CostClass::High] {
        let provider = &config.cost_classes.get(class).provider;
        if !seeded.contains(provider.as_str()) {
            warnings.push_with_hint(
                format!(
                    "cost class {class} bills provider '{provider}' which has \
                     no budget; its jobs will be deferred"
                ),
                "add an [[orchestrator.budgets]] entry for the provider",
            );
        }
    }

    let sentiment = config.modes.get(ResearchMode::SentimentBurst);
    if sentiment.enabled
        && sentiment.cooldown_secs < MIN_SENTIMENT_COOLDOWN_SECS
    {
        warnings.push(format!(
            "sentiment_burst cooldown of {}s is below {}s",
            sentiment.cooldown_secs, MIN_SENTIMENT_COOLDOWN_SECS
        ));
    }

    if ResearchMode::INDIVIDUAL
        .iter()
        .all(|mode| !config.modes.get(*mode).enabled)
        && !config.full_spectrum_enabled
    {
        warnings.push("every research mode is disabled; nothing will be seeded");
    }

    let tick_secs = config.runtime.tick_interval_ms / 1_000;
    if config.lock.lease_ttl_secs > tick_secs.max(1) * 10 {
        warnings.push(format!(
            "lock lease of {}s outlives many ticks; a crashed instance would \
             stall scheduling that long",
            config.lock.lease_ttl_secs
        ));
    }

    if config.executor.timeout_secs > config.executor.stale_grace_secs * 20 {
        warnings.push(
            "executor.stale_grace_secs is small relative to the timeout; slow \
             runs may be reaped while still working",
        );
    }
}
