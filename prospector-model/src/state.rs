use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::mode::ResearchMode;

/// Primary key of the single orchestrator state row.
pub const ORCHESTRATOR_STATE_ID: i32 = 1;

/// Process-wide scheduling memory shared by every orchestrator instance.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct OrchestratorState {
    pub is_full_spectrum_enabled: bool,
    pub last_contrarian_at: Option<DateTime<Utc>>,
    pub last_sentiment_at: Option<DateTime<Utc>>,
    pub last_deep_reasoning_at: Option<DateTime<Utc>>,
    pub contrarian_backpressure: u32,
    pub sentiment_backpressure: u32,
    pub deep_reasoning_backpressure: u32,
    pub total_jobs_today: u32,
    pub total_cost_today: f64,
    pub provider_quota_json: Value,
    pub last_daily_reset_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestratorState {
    pub fn new(is_full_spectrum_enabled: bool, now: DateTime<Utc>) -> Self {
        Self {
            is_full_spectrum_enabled,
            last_contrarian_at: None,
            last_sentiment_at: None,
            last_deep_reasoning_at: None,
            contrarian_backpressure: 0,
            sentiment_backpressure: 0,
            deep_reasoning_backpressure: 0,
            total_jobs_today: 0,
            total_cost_today: 0.0,
            provider_quota_json: Value::Object(Default::default()),
            last_daily_reset_at: None,
            updated_at: now,
        }
    }

    fn last_run_slot(
        &mut self,
        mode: ResearchMode,
    ) -> Option<&mut Option<DateTime<Utc>>> {
        match mode {
            ResearchMode::ContrarianScan => Some(&mut self.last_contrarian_at),
            ResearchMode::SentimentBurst => Some(&mut self.last_sentiment_at),
            ResearchMode::DeepReasoning => {
                Some(&mut self.last_deep_reasoning_at)
            }
            ResearchMode::FullSpectrum => None,
        }
    }

    fn backpressure_slot(&mut self, mode: ResearchMode) -> Option<&mut u32> {
        match mode {
            ResearchMode::ContrarianScan => {
                Some(&mut self.contrarian_backpressure)
            }
            ResearchMode::SentimentBurst => {
                Some(&mut self.sentiment_backpressure)
            }
            ResearchMode::DeepReasoning => {
                Some(&mut self.deep_reasoning_backpressure)
            }
            ResearchMode::FullSpectrum => None,
        }
    }

    /// Last launch of `mode`. Full spectrum reports its most recent sub-mode.
    pub fn last_run_at(&self, mode: ResearchMode) -> Option<DateTime<Utc>> {
        match mode {
            ResearchMode::ContrarianScan => self.last_contrarian_at,
            ResearchMode::SentimentBurst => self.last_sentiment_at,
            ResearchMode::DeepReasoning => self.last_deep_reasoning_at,
            ResearchMode::FullSpectrum => ResearchMode::INDIVIDUAL
                .iter()
                .filter_map(|m| self.last_run_at(*m))
                .max(),
        }
    }

    /// Backpressure of `mode`. Full spectrum reports its worst sub-mode.
    pub fn backpressure(&self, mode: ResearchMode) -> u32 {
        match mode {
            ResearchMode::ContrarianScan => self.contrarian_backpressure,
            ResearchMode::SentimentBurst => self.sentiment_backpressure,
            ResearchMode::DeepReasoning => self.deep_reasoning_backpressure,
            ResearchMode::FullSpectrum => ResearchMode::INDIVIDUAL
                .iter()
                .map(|m| self.backpressure(*m))
                .max()
                .unwrap_or(0),
        }
    }

    pub fn stamp_run(&mut self, mode: ResearchMode, now: DateTime<Utc>) {
        for sub in mode.sub_modes() {
            if let Some(slot) = self.last_run_slot(*sub) {
                *slot = Some(now);
            }
        }
        self.updated_at = now;
    }

    pub fn raise_backpressure(&mut self, mode: ResearchMode) {
        for sub in mode.sub_modes() {
            if let Some(slot) = self.backpressure_slot(*sub) {
                *slot = slot.saturating_add(1);
            }
        }
    }

    pub fn lower_backpressure(&mut self, mode: ResearchMode) {
        for sub in mode.sub_modes() {
            if let Some(slot) = self.backpressure_slot(*sub) {
                *slot = slot.saturating_sub(1);
            }
        }
    }

    /// Clamp a counter down to `ceiling` so a parked mode gets one probe run.
    pub fn clamp_backpressure(&mut self, mode: ResearchMode, ceiling: u32) {
        if let Some(slot) = self.backpressure_slot(mode) {
            *slot = (*slot).min(ceiling);
        }
    }

    pub fn record_job_settled(&mut self, cost_usd: f64) {
        self.total_jobs_today = self.total_jobs_today.saturating_add(1);
        self.total_cost_today += cost_usd;
    }

    pub fn daily_reset_done(&self, now: DateTime<Utc>) -> bool {
        self.last_daily_reset_at
            .is_some_and(|at| at.date_naive() == now.date_naive())
    }

    /// Zero the daily totals once per UTC day.
    pub fn apply_daily_reset(&mut self, now: DateTime<Utc>) -> bool {
        if self.daily_reset_done(now) {
            return false;
        }
        self.total_jobs_today = 0;
        self.total_cost_today = 0.0;
        self.last_daily_reset_at = Some(now);
        self.updated_at = now;
        true
    }
}
