//! Market context forwarded to the research executor.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

/// Supplies the current market regime description. The regime feed lives
/// outside the orchestrator; a failure here degrades to `null` in the
/// request context rather than failing the job.
#[async_trait]
pub trait MarketRegimeSource: Send + Sync + fmt::Debug {
    async fn current_regime(&self) -> Option<Value>;
}

/// Fixed regime, or none at all.
#[derive(Clone, Debug, Default)]
pub struct StaticRegime(pub Option<Value>);

#[async_trait]
impl MarketRegimeSource for StaticRegime {
    async fn current_regime(&self) -> Option<Value> {
        self.0.clone()
    }
}
