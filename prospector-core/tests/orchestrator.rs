mod support;

use std::sync::Arc;

use chrono::Duration;
use prospector_core::{
    error::OrchestratorError,
    orchestration::{
        Clock, EnqueueRequest, ExecutionOutcome, ModeGate,
        OrchestratorEventPayload, OutcomeDisposition, REASON_BUDGET_EXCEEDED,
        REASON_LEASE_EXPIRED, ResearchOrchestrator, TickOutcome, fingerprint,
    },
};
use prospector_model::{JobStatus, ResearchMode};

use support::{Harness, candidate, config, cost, only, succeeded, t0};

#[tokio::test]
async fn launches_by_priority_until_the_cap() {
    let h = Harness::new(config()).await;

    let first = h.launch().await;
    let second = h.launch().await;
    let third = h.launch().await;
    assert_eq!(first.mode, ResearchMode::DeepReasoning);
    assert_eq!(first.priority, 80);
    assert_eq!(second.mode, ResearchMode::ContrarianScan);
    assert_eq!(third.mode, ResearchMode::SentimentBurst);
    assert_eq!(third.status, JobStatus::Running);
    assert_eq!(third.started_at, Some(t0()));

    let fourth = h.orchestrator.tick().await.unwrap();
    assert_eq!(fourth, TickOutcome::Saturated { running: 3 });

    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.running, 3);
    assert_eq!(snapshot.queued, 0);
    assert_eq!(snapshot.state.last_deep_reasoning_at, Some(t0()));
}

#[tokio::test]
async fn explicit_priority_outranks_seeds() {
    let h = Harness::new(config()).await;
    let urgent = h
        .orchestrator
        .enqueue(
            EnqueueRequest::new(ResearchMode::SentimentBurst)
                .with_priority(95),
        )
        .await
        .unwrap();
    assert_eq!(urgent.status, JobStatus::Queued);

    let launched = h.launch().await;
    assert_eq!(launched.id, urgent.id);
}

#[tokio::test]
async fn scheduled_jobs_wait_until_due() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let later = h
        .orchestrator
        .enqueue(
            EnqueueRequest::new(ResearchMode::ContrarianScan)
                .scheduled_for(t0() + Duration::minutes(30)),
        )
        .await
        .unwrap();

    let outcome = h.orchestrator.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Idle { .. }), "{outcome:?}");

    h.advance_minutes(31);
    assert_eq!(h.launch().await.id, later.id);
}

#[tokio::test]
async fn exhausted_budget_defers_until_the_daily_reset() {
    let h = Harness::new(config()).await;
    h.stores.budgets.charge("default", 48.0).await.unwrap();

    let outcome = h.orchestrator.tick().await.unwrap();
    let TickOutcome::Launched { job, deferred } = outcome else {
        panic!("expected a launch, got {outcome:?}");
    };
    // 48 + 4.0 (HIGH) > 50, while 48 + 1.0 (MEDIUM) still fits.
    assert_eq!(job.mode, ResearchMode::ContrarianScan);
    assert_eq!(deferred.len(), 1);

    let blocked = h.job(deferred[0]).await;
    assert_eq!(blocked.mode, ResearchMode::DeepReasoning);
    assert_eq!(blocked.status, JobStatus::Deferred);
    assert_eq!(blocked.deferred_reason.as_deref(), Some(REASON_BUDGET_EXCEEDED));
    let state = h.orchestrator.snapshot().await.unwrap().state;
    assert_eq!(state.deep_reasoning_backpressure, 1);

    h.advance_minutes(24 * 60);
    let report = h.orchestrator.reset_daily().await.unwrap();
    assert_eq!(report.providers, vec!["default".to_string()]);

    let relaunched = h.launch().await;
    assert_eq!(relaunched.id, blocked.id);
    assert_eq!(
        relaunched.deferred_reason, None,
        "launch clears the deferral reason"
    );
}

#[tokio::test]
async fn failures_retry_with_backoff_then_stop() {
    let mut config = only(ResearchMode::ContrarianScan);
    config.modes.contrarian_scan.max_retries = 1;
    let h = Harness::new(config).await;

    let job = h.launch().await;
    let report = h
        .orchestrator
        .record_outcome(job.id, ExecutionOutcome::failed("provider 503"))
        .await
        .unwrap();
    assert_eq!(
        report.disposition,
        OutcomeDisposition::RetryScheduled {
            attempt: 1,
            run_after: t0() + Duration::seconds(60),
        }
    );
    let queued = h.job(job.id).await;
    assert_eq!(queued.status, JobStatus::Queued);
    assert_eq!(queued.retry_count, 1);
    assert_eq!(queued.error_message.as_deref(), Some("provider 503"));

    let early = h.orchestrator.tick().await.unwrap();
    assert_eq!(early, TickOutcome::Idle { deferred: vec![] });

    // The retry ignores the mode cooldown, only its own backoff applies.
    h.advance_minutes(2);
    let retry = h.launch().await;
    assert_eq!(retry.id, job.id);

    let report = h
        .orchestrator
        .record_outcome(retry.id, ExecutionOutcome::failed("provider 503"))
        .await
        .unwrap();
    assert_eq!(report.disposition, OutcomeDisposition::Failed);
    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, failed.max_retries);

    let state = h.orchestrator.snapshot().await.unwrap().state;
    assert_eq!(state.contrarian_backpressure, 2);
    assert_eq!(state.total_jobs_today, 2);
}

#[tokio::test]
async fn repeated_candidates_are_suppressed() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let alpha = candidate("Alpha", "RSI dips revert");
    let beta = candidate("Beta", "Volume spikes fade");

    let job = h.launch().await;
    let report = h
        .orchestrator
        .record_outcome(
            job.id,
            succeeded(vec![alpha.clone(), beta.clone()], 0.8),
        )
        .await
        .unwrap();
    assert_eq!(report.disposition, OutcomeDisposition::Completed);
    assert_eq!(report.accepted.len(), 2);
    assert!(report.duplicates.is_empty());
    assert_eq!(report.charged_usd, 0.8);

    let completed = h.job(job.id).await;
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.candidates_created, 2);
    assert_eq!(completed.cost_usd, Some(0.8));
    assert_eq!(completed.input_tokens, Some(1_200));
    assert_eq!(completed.fingerprint_hash, Some(fingerprint(&alpha)));
    assert_eq!(h.sink.candidate_count().await, 2);

    let budget = h.stores.budgets.get("default").await.unwrap().unwrap();
    assert_eq!(budget.used_today, 0.8);

    h.advance_minutes(121);
    let again = h.launch().await;
    let mut events = h.bus.subscribe();
    let renamed = candidate("Alpha v2", "  rsi DIPS   revert ");
    let report = h
        .orchestrator
        .record_outcome(again.id, succeeded(vec![renamed], 0.3))
        .await
        .unwrap();
    assert!(report.accepted.is_empty());
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].hit_count, 2);

    let completed = h.job(again.id).await;
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.candidates_created, 0);
    assert_eq!(completed.fingerprint_hash, Some(fingerprint(&alpha)));
    assert_eq!(h.sink.batches().await.len(), 1, "nothing new to hand off");

    let mut saw_duplicate = false;
    while let Ok(event) = events.try_recv() {
        if let OrchestratorEventPayload::DuplicateCandidate {
            job_id,
            hit_count,
            ..
        } = event.payload
        {
            assert_eq!(job_id, again.id);
            assert_eq!(hit_count, 2);
            saw_duplicate = true;
        }
    }
    assert!(saw_duplicate);
}

#[tokio::test]
async fn expired_fingerprints_admit_the_idea_again() {
    let mut config = only(ResearchMode::ContrarianScan);
    config.dedup.fingerprint_ttl_secs = Some(60 * 60);
    let h = Harness::new(config).await;
    let alpha = candidate("Alpha", "RSI dips revert");

    let job = h.launch().await;
    h.orchestrator
        .record_outcome(job.id, succeeded(vec![alpha.clone()], 0.1))
        .await
        .unwrap();

    h.advance_minutes(3 * 60);
    let job = h.launch().await;
    let report = h
        .orchestrator
        .record_outcome(job.id, succeeded(vec![alpha], 0.1))
        .await
        .unwrap();
    assert_eq!(report.accepted.len(), 1);
    assert!(report.duplicates.is_empty());

    h.advance_minutes(2 * 60);
    assert_eq!(h.orchestrator.purge_expired_fingerprints().await.unwrap(), 1);
    assert_eq!(h.orchestrator.purge_expired_fingerprints().await.unwrap(), 0);
}

#[tokio::test]
async fn sentiment_waits_out_its_cooldown() {
    let h = Harness::new(only(ResearchMode::SentimentBurst)).await;
    let job = h.launch().await;
    h.orchestrator
        .record_outcome(job.id, succeeded(vec![], 0.1))
        .await
        .unwrap();

    h.advance_minutes(15);
    let outcome = h.orchestrator.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Idle { .. }), "{outcome:?}");
    let snapshot = h.orchestrator.snapshot().await.unwrap();
    let sentiment = snapshot
        .modes
        .iter()
        .find(|m| m.mode == ResearchMode::SentimentBurst)
        .unwrap();
    assert_eq!(
        sentiment.gate,
        ModeGate::CoolingDown {
            until: t0() + Duration::minutes(30)
        }
    );

    h.advance_minutes(20);
    let next = h.launch().await;
    assert_eq!(next.mode, ResearchMode::SentimentBurst);
    assert_ne!(next.id, job.id);
}

#[tokio::test]
async fn repeated_failures_park_a_mode_until_the_reset_clamp() {
    let mut config = only(ResearchMode::DeepReasoning);
    config.modes.deep_reasoning.max_retries = 0;
    config.modes.deep_reasoning.cooldown_secs = 60;
    config.modes.deep_reasoning.backpressure_step_secs = Some(0);
    let h = Harness::new(config).await;

    for _ in 0..3 {
        let job = h.launch().await;
        let report = h
            .orchestrator
            .record_outcome(job.id, ExecutionOutcome::failed("bad output"))
            .await
            .unwrap();
        assert_eq!(report.disposition, OutcomeDisposition::Failed);
        h.advance_minutes(2);
    }

    let outcome = h.orchestrator.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Idle { .. }), "{outcome:?}");
    let snapshot = h.orchestrator.snapshot().await.unwrap();
    assert_eq!(snapshot.state.deep_reasoning_backpressure, 3);
    let deep = snapshot
        .modes
        .iter()
        .find(|m| m.mode == ResearchMode::DeepReasoning)
        .unwrap();
    assert_eq!(
        deep.gate,
        ModeGate::Parked {
            backpressure: 3,
            ceiling: 2
        }
    );

    let report = h.orchestrator.reset_daily().await.unwrap();
    assert!(report.totals_reset);
    let state = h.orchestrator.snapshot().await.unwrap().state;
    assert_eq!(state.deep_reasoning_backpressure, 2);
    assert_eq!(state.total_jobs_today, 0);

    let probe = h.launch().await;
    assert_eq!(probe.mode, ResearchMode::DeepReasoning);
}

#[tokio::test]
async fn daily_reset_runs_once_per_day() {
    let h = Harness::new(config()).await;
    let first = h.orchestrator.reset_daily().await.unwrap();
    assert!(!first.is_noop());

    h.stores.budgets.charge("default", 10.0).await.unwrap();
    h.advance_minutes(60);
    let repeat = h.orchestrator.reset_daily().await.unwrap();
    assert!(repeat.is_noop());
    let budget = h.stores.budgets.get("default").await.unwrap().unwrap();
    assert_eq!(budget.used_today, 10.0);

    h.advance_minutes(24 * 60);
    let next_day = h.orchestrator.reset_daily().await.unwrap();
    assert_eq!(next_day.providers, vec!["default".to_string()]);
    assert!(next_day.totals_reset);
    let budget = h.stores.budgets.get("default").await.unwrap().unwrap();
    assert_eq!(budget.used_today, 0.0);
    assert_eq!(budget.used_period, 10.0, "same month keeps period spend");
}

#[tokio::test]
async fn late_outcomes_of_cancelled_jobs_only_charge_spend() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let job = h.launch().await;

    let cancelled = h.orchestrator.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let report = h
        .orchestrator
        .record_outcome(
            job.id,
            succeeded(vec![candidate("Alpha", "RSI dips revert")], 0.5),
        )
        .await
        .unwrap();
    assert_eq!(
        report.disposition,
        OutcomeDisposition::Discarded {
            status: JobStatus::Cancelled
        }
    );
    assert_eq!(report.charged_usd, 0.5);
    assert_eq!(h.job(job.id).await.status, JobStatus::Cancelled);
    assert!(h.sink.batches().await.is_empty());
    let budget = h.stores.budgets.get("default").await.unwrap().unwrap();
    assert_eq!(budget.used_today, 0.5);

    let again = h.orchestrator.cancel(job.id).await.unwrap_err();
    assert!(again.is_invalid_transition(), "{again}");
}

#[tokio::test]
async fn queued_jobs_can_be_cancelled() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let job = h
        .orchestrator
        .enqueue(EnqueueRequest::new(ResearchMode::SentimentBurst))
        .await
        .unwrap();
    let cancelled = h.orchestrator.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
}

#[tokio::test]
async fn invalid_reported_cost_is_ignored() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let job = h.launch().await;
    let report = h
        .orchestrator
        .record_outcome(job.id, succeeded(vec![], -3.0))
        .await
        .unwrap();
    assert_eq!(report.disposition, OutcomeDisposition::Completed);
    assert_eq!(report.charged_usd, 0.0);
    assert_eq!(h.job(job.id).await.cost_usd, Some(0.0));
}

#[tokio::test]
async fn a_held_lease_skips_the_tick_until_it_expires() {
    let h = Harness::new(config()).await;
    let foreign = h
        .stores
        .lock
        .try_acquire(
            "research-orchestrator",
            "other-instance",
            Duration::seconds(15),
            t0(),
        )
        .await
        .unwrap();
    assert!(foreign.is_some());

    let mut events = h.bus.subscribe();
    assert_eq!(h.orchestrator.tick().await.unwrap(), TickOutcome::LockBusy);
    let skipped = events.try_recv().unwrap();
    assert!(matches!(
        skipped.payload,
        OrchestratorEventPayload::TickSkipped { .. }
    ));

    h.clock.advance(Duration::seconds(16));
    assert!(h.orchestrator.tick().await.unwrap().launched().is_some());
}

#[tokio::test]
async fn orphaned_running_jobs_are_reaped() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let job = h.launch().await;

    h.advance_minutes(10);
    assert!(h.orchestrator.reap_stale_running().await.unwrap().is_empty());

    h.advance_minutes(11);
    let reports = h.orchestrator.reap_stale_running().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        reports[0].disposition,
        OutcomeDisposition::RetryScheduled { attempt: 1, .. }
    ));
    let reaped = h.job(job.id).await;
    assert_eq!(reaped.status, JobStatus::Queued);
    assert_eq!(reaped.error_message.as_deref(), Some(REASON_LEASE_EXPIRED));
}

#[tokio::test]
async fn full_spectrum_covers_every_sub_mode() {
    let h = Harness::new(config()).await;
    let state = h.orchestrator.set_full_spectrum(true).await.unwrap();
    assert!(state.is_full_spectrum_enabled);

    let job = h.launch().await;
    assert_eq!(job.mode, ResearchMode::FullSpectrum);
    assert_eq!(job.priority, 90);

    let state = h.orchestrator.snapshot().await.unwrap().state;
    assert_eq!(state.last_contrarian_at, Some(t0()));
    assert_eq!(state.last_sentiment_at, Some(t0()));
    assert_eq!(state.last_deep_reasoning_at, Some(t0()));

    // Sub-modes are busy while the meta run is in flight.
    h.orchestrator
        .enqueue(EnqueueRequest::new(ResearchMode::SentimentBurst))
        .await
        .unwrap();
    h.advance_minutes(45);
    let outcome = h.orchestrator.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Idle { .. }), "{outcome:?}");

    h.orchestrator
        .record_outcome(job.id, succeeded(vec![], 2.0))
        .await
        .unwrap();
    let next = h.launch().await;
    assert_eq!(next.mode, ResearchMode::SentimentBurst);
}

#[tokio::test]
async fn enqueue_publishes_a_status_event() {
    let h = Harness::new(config()).await;
    let mut events = h.bus.subscribe();
    let job = h
        .orchestrator
        .enqueue(EnqueueRequest::new(ResearchMode::DeepReasoning))
        .await
        .unwrap();

    let event = events.try_recv().unwrap();
    assert_eq!(event.meta.instance_id, "test-instance");
    match event.payload {
        OrchestratorEventPayload::StatusChanged {
            job_id, from, to, ..
        } => {
            assert_eq!(job_id, job.id);
            assert_eq!(from, None);
            assert_eq!(to, JobStatus::Queued);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn unknown_jobs_are_reported() {
    let h = Harness::new(config()).await;
    let missing = prospector_model::JobId::new();
    let err = h
        .orchestrator
        .record_outcome(missing, ExecutionOutcome::failed("x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        prospector_core::error::OrchestratorError::NotFound(_)
    ));
}

#[tokio::test]
async fn cancelled_runs_charge_spend_without_settling() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let job = h.launch().await;

    let report = h
        .orchestrator
        .record_outcome(
            job.id,
            ExecutionOutcome::Cancelled {
                diagnostics: Some(cost(0.7)),
            },
        )
        .await
        .unwrap();
    assert_eq!(report.disposition, OutcomeDisposition::Cancelled);
    assert_eq!(report.charged_usd, 0.7);

    let cancelled = h.job(job.id).await;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.cost_usd, None);
    let budget = h.stores.budgets.get("default").await.unwrap().unwrap();
    assert_eq!(budget.used_today, 0.7);
    let state = h.orchestrator.snapshot().await.unwrap().state;
    assert_eq!(state.total_jobs_today, 0);
    assert_eq!(state.total_cost_today, 0.0);
}

#[tokio::test]
async fn recording_waits_out_a_crashed_holders_lease() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let job = h.launch().await;
    let crashed = h
        .stores
        .lock
        .try_acquire(
            "research-orchestrator",
            "crashed-peer",
            Duration::seconds(1),
            t0(),
        )
        .await
        .unwrap();
    assert!(crashed.is_some());

    let clock = h.clock.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        clock.advance(Duration::seconds(2));
    });
    let report = h
        .orchestrator
        .record_outcome(
            job.id,
            succeeded(vec![candidate("Alpha", "RSI dips revert")], 1.25),
        )
        .await
        .unwrap();
    assert_eq!(report.disposition, OutcomeDisposition::Completed);
    assert_eq!(h.job(job.id).await.status, JobStatus::Completed);
    let budget = h.stores.budgets.get("default").await.unwrap().unwrap();
    assert_eq!(budget.used_today, 1.25);
    assert_eq!(h.sink.candidate_count().await, 1);
}

#[tokio::test]
async fn a_lease_held_past_the_wait_leaves_the_job_running() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let job = h.launch().await;
    let foreign = h
        .stores
        .lock
        .try_acquire(
            "research-orchestrator",
            "other-instance",
            Duration::seconds(15),
            t0(),
        )
        .await
        .unwrap()
        .expect("lease free");

    let err = h
        .orchestrator
        .record_outcome(job.id, succeeded(vec![], 0.3))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::LockUnavailable(_)), "{err}");
    assert!(err.is_transient());
    assert_eq!(h.job(job.id).await.status, JobStatus::Running);

    h.stores.lock.release(&foreign).await.unwrap();
    let report = h
        .orchestrator
        .record_outcome(job.id, succeeded(vec![], 0.3))
        .await
        .unwrap();
    assert_eq!(report.disposition, OutcomeDisposition::Completed);
}

#[tokio::test]
async fn rejected_batches_leave_their_ideas_unrecorded() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    let idea = candidate("Alpha", "funding spikes revert");
    let hash = fingerprint(&idea);

    let first = h.launch().await;
    h.sink.set_rejecting(true);
    let report = h
        .orchestrator
        .record_outcome(first.id, succeeded(vec![idea.clone()], 0.6))
        .await
        .unwrap();
    assert_eq!(report.disposition, OutcomeDisposition::Completed);
    assert!(report.accepted.is_empty());
    assert_eq!(report.undelivered.len(), 1);
    assert_eq!(report.charged_usd, 0.6);
    let settled = h.job(first.id).await;
    assert_eq!(settled.candidates_created, 0);
    assert_eq!(settled.fingerprint_hash, None);
    assert!(
        h.stores
            .fingerprints
            .get(&hash, h.clock.now())
            .await
            .unwrap()
            .is_none()
    );

    h.sink.set_rejecting(false);
    h.advance_minutes(121);
    let second = h.launch().await;
    let report = h
        .orchestrator
        .record_outcome(second.id, succeeded(vec![idea], 0.6))
        .await
        .unwrap();
    assert_eq!(report.accepted.len(), 1);
    assert!(report.duplicates.is_empty());
    assert_eq!(h.sink.candidate_count().await, 1);
    assert_eq!(
        h.job(second.id).await.fingerprint_hash.as_deref(),
        Some(hash.as_str())
    );
}

#[tokio::test]
async fn a_freed_slot_admits_the_next_launch() {
    let mut config = config();
    config.max_concurrent = 1;
    let h = Harness::new(config).await;

    let first = h.launch().await;
    assert_eq!(first.mode, ResearchMode::DeepReasoning);
    assert_eq!(
        h.orchestrator.tick().await.unwrap(),
        TickOutcome::Saturated { running: 1 }
    );

    h.orchestrator
        .record_outcome(first.id, succeeded(vec![], 3.0))
        .await
        .unwrap();
    let next = h.launch().await;
    assert_eq!(next.mode, ResearchMode::ContrarianScan);
}

#[tokio::test]
async fn denied_jobs_raise_backpressure_once_per_tick() {
    let h = Harness::new(only(ResearchMode::ContrarianScan)).await;
    h.stores.budgets.charge("default", 49.5).await.unwrap();
    for _ in 0..3 {
        h.orchestrator
            .enqueue(EnqueueRequest::new(ResearchMode::ContrarianScan))
            .await
            .unwrap();
    }

    let outcome = h.orchestrator.tick().await.unwrap();
    let TickOutcome::Idle { deferred } = outcome else {
        panic!("expected an idle tick, got {outcome:?}");
    };
    assert_eq!(deferred.len(), 3);
    let state = h.orchestrator.snapshot().await.unwrap().state;
    assert_eq!(state.backpressure(ResearchMode::ContrarianScan), 1);
}

#[tokio::test]
async fn the_stored_full_spectrum_toggle_survives_a_reboot() {
    let h = Harness::new(config()).await;
    h.orchestrator.set_full_spectrum(true).await.unwrap();

    let rebooted = ResearchOrchestrator::new(
        config(),
        h.stores.clone(),
        Arc::new(h.clock.clone()),
        h.bus.clone(),
        h.sink.clone(),
    )
    .unwrap();
    let state = rebooted.bootstrap().await.unwrap();
    assert!(!rebooted.config().full_spectrum_enabled);
    assert!(state.is_full_spectrum_enabled);
}
