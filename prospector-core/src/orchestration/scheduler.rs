//! Pure scheduling policy: every decision here is a function of the
//! persisted [`OrchestratorState`], the configured [`ModePolicies`] and an
//! explicit `now`.

use std::cmp::Ordering;

use chrono::{DateTime, Timelike, Utc};
use prospector_model::{OrchestratorState, ResearchJob, ResearchMode};
use serde::Serialize;

use super::config::{ModePolicies, ModePolicy};

/// Why a mode may or may not launch at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum ModeGate {
    Ready,
    Disabled,
    Parked { backpressure: u32, ceiling: u32 },
    CoolingDown { until: DateTime<Utc> },
    OutsideWindow,
}

impl ModeGate {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModeGate::Ready)
    }
}

/// Earliest instant the cooldown of `mode` allows another launch. `None`
/// when the mode has never run.
pub fn cooldown_until(
    mode: ResearchMode,
    policy: &ModePolicy,
    state: &OrchestratorState,
) -> Option<DateTime<Utc>> {
    let last = state.last_run_at(mode)?;
    let cooldown = policy.effective_cooldown(state.backpressure(mode));
    Some(
        last.checked_add_signed(cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    )
}

/// True when `now` falls inside one of the policy's clock-aligned windows,
/// or when the policy is not aligned at all.
pub fn in_aligned_window(policy: &ModePolicy, now: DateTime<Utc>) -> bool {
    if !policy.is_aligned() {
        return true;
    }
    let minute = now.minute();
    policy.aligned_minutes.iter().any(|offset| {
        (minute + 60 - offset % 60) % 60 < policy.aligned_window_minutes
    })
}

/// Gate applied to fresh launches of `mode`.
pub fn mode_gate(
    mode: ResearchMode,
    policy: &ModePolicy,
    state: &OrchestratorState,
    now: DateTime<Utc>,
) -> ModeGate {
    if !policy.enabled {
        return ModeGate::Disabled;
    }
    let backpressure = state.backpressure(mode);
    if policy.is_parked(backpressure) {
        return ModeGate::Parked {
            backpressure,
            ceiling: policy.backpressure_ceiling,
        };
    }
    if let Some(until) = cooldown_until(mode, policy, state)
        && now < until
    {
        return ModeGate::CoolingDown { until };
    }
    if !in_aligned_window(policy, now) {
        return ModeGate::OutsideWindow;
    }
    ModeGate::Ready
}

/// Gate applied to an existing queued job. Retries are paced by their own
/// backoff and skip the cooldown and window checks; every job still
/// respects a disabled or parked mode.
pub fn job_gate(
    job: &ResearchJob,
    modes: &ModePolicies,
    state: &OrchestratorState,
    now: DateTime<Utc>,
) -> ModeGate {
    let policy = modes.get(job.mode);
    let gate = mode_gate(job.mode, policy, state, now);
    match gate {
        ModeGate::CoolingDown { .. } | ModeGate::OutsideWindow
            if job.retry_count > 0 =>
        {
            ModeGate::Ready
        }
        other => other,
    }
}

/// Modes the scheduler may auto-seed this tick. With full spectrum on,
/// only the meta-mode is seeded; otherwise only individual modes are.
pub fn seedable_modes(
    modes: &ModePolicies,
    state: &OrchestratorState,
    now: DateTime<Utc>,
) -> Vec<ResearchMode> {
    let pool: &[ResearchMode] = if state.is_full_spectrum_enabled {
        &[ResearchMode::FullSpectrum]
    } else {
        &ResearchMode::INDIVIDUAL
    };
    pool.iter()
        .copied()
        .filter(|mode| mode_gate(*mode, modes.get(*mode), state, now).is_ready())
        .collect()
}

/// Priority descending, then earliest `scheduled_for`/`created_at`, then id
/// so the order is total.
pub fn launch_order(a: &ResearchJob, b: &ResearchJob) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.ordering_time().cmp(&b.ordering_time()))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn rank(jobs: &mut [ResearchJob]) {
    jobs.sort_by(launch_order);
}

/// Operator view of every mode's gate.
#[derive(Clone, Debug, Serialize)]
pub struct ModeEligibility {
    pub mode: ResearchMode,
    pub gate: ModeGate,
    pub backpressure: u32,
    pub last_run_at: Option<DateTime<Utc>>,
}

pub fn eligibility_report(
    modes: &ModePolicies,
    state: &OrchestratorState,
    now: DateTime<Utc>,
) -> Vec<ModeEligibility> {
    ResearchMode::all()
        .iter()
        .map(|mode| ModeEligibility {
            mode: *mode,
            gate: mode_gate(*mode, modes.get(*mode), state, now),
            backpressure: state.backpressure(*mode),
            last_run_at: state.last_run_at(*mode),
        })
        .collect()
}
