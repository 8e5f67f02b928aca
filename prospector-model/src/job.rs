use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::{ModelError, Result},
    ids::JobId,
    mode::{CostClass, ResearchMode},
};

/// Lifecycle states of a research job.
///
/// `Queued -> Running -> {Completed | Failed | Cancelled}`, with
/// `Queued <-> Deferred` for gate failures and `Failed -> Queued` for
/// retries. `Completed` and `Cancelled` are always terminal; `Failed` is
/// terminal once retries are spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Deferred,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Deferred => "DEFERRED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Edges of the lifecycle graph. `Failed -> Queued` is additionally
    /// gated on the retry budget, see [`ResearchJob::requeue_for_retry`].
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Deferred)
                | (Queued, Cancelled)
                | (Deferred, Queued)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Queued)
        )
    }

    /// States that never change again without a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Jobs that still hold a mode's slot for seeding purposes.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Deferred | JobStatus::Running
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "DEFERRED" => Ok(JobStatus::Deferred),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(ModelError::UnknownVariant {
                kind: "job status",
                value: s.to_string(),
            }),
        }
    }
}

/// A unit of scheduled research work.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ResearchJob {
    pub id: JobId,
    pub mode: ResearchMode,
    pub status: JobStatus,
    pub cost_class: CostClass,
    pub priority: i32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub fingerprint_hash: Option<String>,
    pub deferred_reason: Option<String>,
    pub error_message: Option<String>,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub candidates_created: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Usage figures reported when a run finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JobUsage {
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

impl ResearchJob {
    /// Time used to order jobs inside one priority band.
    pub fn ordering_time(&self) -> DateTime<Utc> {
        self.scheduled_for.unwrap_or(self.created_at)
    }

    /// Eligible for launch at `now` from the queue's point of view.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued
            && self.scheduled_for.is_none_or(|at| at <= now)
    }

    pub fn retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Running, now)?;
        self.started_at = Some(now);
        self.completed_at = None;
        self.deferred_reason = None;
        Ok(())
    }

    pub fn complete(
        &mut self,
        now: DateTime<Utc>,
        usage: JobUsage,
        candidates_created: u32,
    ) -> Result<()> {
        validate_cost(usage.cost_usd)?;
        self.transition(JobStatus::Completed, now)?;
        self.completed_at = Some(now);
        self.error_message = None;
        self.candidates_created = candidates_created;
        self.apply_usage(usage);
        Ok(())
    }

    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        message: impl Into<String>,
        usage: JobUsage,
    ) -> Result<()> {
        validate_cost(usage.cost_usd)?;
        self.transition(JobStatus::Failed, now)?;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        self.apply_usage(usage);
        Ok(())
    }

    pub fn defer(
        &mut self,
        now: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.transition(JobStatus::Deferred, now)?;
        self.deferred_reason = Some(reason.into());
        Ok(())
    }

    /// Deferred jobs keep their reason for audit until they launch.
    pub fn requeue_deferred(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Deferred {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: JobStatus::Queued,
            });
        }
        self.transition(JobStatus::Queued, now)
    }

    /// Re-queue a failed job, consuming one retry. Cost and token figures of
    /// the failed attempt are dropped along with the run timestamps; the
    /// error message survives until the next attempt settles.
    pub fn requeue_for_retry(
        &mut self,
        now: DateTime<Utc>,
        run_after: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != JobStatus::Failed {
            return Err(ModelError::InvalidTransition {
                from: self.status,
                to: JobStatus::Queued,
            });
        }
        if !self.retries_left() {
            return Err(ModelError::RetriesExhausted {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.transition(JobStatus::Queued, now)?;
        self.retry_count += 1;
        self.scheduled_for = Some(run_after);
        self.started_at = None;
        self.completed_at = None;
        self.cost_usd = None;
        self.input_tokens = None;
        self.output_tokens = None;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Cancelled, now)?;
        self.completed_at = Some(now);
        Ok(())
    }

    fn apply_usage(&mut self, usage: JobUsage) {
        self.cost_usd = Some(usage.cost_usd.unwrap_or(0.0));
        self.input_tokens = usage.input_tokens;
        self.output_tokens = usage.output_tokens;
    }
}

fn validate_cost(cost: Option<f64>) -> Result<()> {
    match cost {
        Some(value) if !value.is_finite() || value < 0.0 => {
            Err(ModelError::InvalidCost(format!("{value}")))
        }
        _ => Ok(()),
    }
}

/// Builder for a fresh QUEUED job.
#[derive(Debug, Clone)]
pub struct NewResearchJob {
    mode: ResearchMode,
    priority: i32,
    scheduled_for: Option<DateTime<Utc>>,
    max_retries: u32,
}

impl NewResearchJob {
    pub fn new(mode: ResearchMode, priority: i32, max_retries: u32) -> Self {
        Self {
            mode,
            priority,
            scheduled_for: None,
            max_retries,
        }
    }

    pub fn scheduled_for(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.scheduled_for = at;
        self
    }

    pub fn build(self, now: DateTime<Utc>) -> ResearchJob {
        ResearchJob {
            id: JobId::new(),
            mode: self.mode,
            status: JobStatus::Queued,
            cost_class: self.mode.cost_class(),
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: self.max_retries,
            fingerprint_hash: None,
            deferred_reason: None,
            error_message: None,
            cost_usd: None,
            input_tokens: None,
            output_tokens: None,
            candidates_created: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
