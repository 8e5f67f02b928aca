use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prospector_model::{JobId, JobStatus, ResearchMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Metadata envelope attached to every orchestrator event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub event_id: Uuid,
    pub instance_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(instance_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            version: 1,
            event_id: Uuid::now_v7(),
            instance_id: instance_id.into(),
            occurred_at,
        }
    }
}

/// Why a tick launched nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSkipReason {
    LockBusy,
    Saturated { running: usize },
    NothingEligible,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OrchestratorEventPayload {
    StatusChanged {
        job_id: JobId,
        mode: ResearchMode,
        from: Option<JobStatus>,
        to: JobStatus,
        reason: Option<String>,
    },
    DuplicateCandidate {
        job_id: JobId,
        fingerprint_hash: String,
        hit_count: u32,
    },
    TickSkipped {
        reason: TickSkipReason,
    },
    BudgetCharged {
        job_id: JobId,
        provider: String,
        cost_usd: f64,
        used_today: f64,
        daily_budget: f64,
    },
    DailyReset {
        providers: Vec<String>,
        totals_reset: bool,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorEvent {
    pub meta: EventMeta,
    pub payload: OrchestratorEventPayload,
}

#[async_trait]
pub trait EventPublisher: Send + Sync + std::fmt::Debug {
    async fn publish(&self, event: OrchestratorEvent) -> Result<()>;
}
