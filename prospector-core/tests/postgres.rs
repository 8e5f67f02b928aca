//! Postgres store behaviour. Needs `DATABASE_URL`; skipped otherwise.
#![cfg(feature = "database")]

use chrono::{Duration, TimeZone, Utc};
use prospector_core::{
    MIGRATOR,
    orchestration::{AcceptedCandidate, CandidateBatch, CandidateSink},
    persistence::{
        FingerprintObservation, JobFilter,
        postgres::{PostgresCandidateSink, postgres_stores},
    },
};
use prospector_model::{
    CandidateId, JobStatus, JobUsage, NewResearchJob, OrchestratorState,
    ResearchMode, StrategyCandidate,
};
use serde_json::json;
use sqlx::{PgPool, postgres::PgPoolOptions};

async fn pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping postgres tests");
        return None;
    };
    let pool = match PgPoolOptions::new().max_connections(4).connect(&url).await
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("cannot connect to {url}: {e}; skipping");
            return None;
        }
    };
    if let Err(e) = MIGRATOR.run(&pool).await {
        eprintln!("migrations failed: {e}; skipping");
        return None;
    }
    sqlx::query(
        "TRUNCATE research_candidates, research_jobs, candidate_fingerprints, \
         orchestrator_state, llm_budgets, orchestrator_locks",
    )
    .execute(&pool)
    .await
    .expect("truncate");
    Some(pool)
}

// One sequential test so the truncation above cannot race another test.
#[tokio::test]
async fn postgres_stores_behave_like_the_in_memory_ones() {
    let Some(pool) = pool().await else {
        return;
    };
    let stores = postgres_stores(pool.clone());
    let now = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();

    // Jobs: insert, list, and the one-running-per-mode guard.
    let a = NewResearchJob::new(ResearchMode::ContrarianScan, 60, 2).build(now);
    let b = NewResearchJob::new(ResearchMode::ContrarianScan, 60, 2)
        .build(now + Duration::seconds(1));
    stores.jobs.insert(&a).await.unwrap();
    stores.jobs.insert(&b).await.unwrap();
    assert_eq!(stores.jobs.get(a.id).await.unwrap(), Some(a.clone()));

    let queued = stores
        .jobs
        .list(JobFilter::status(JobStatus::Queued))
        .await
        .unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].id, b.id, "newest first");

    let mut running_a = a.clone();
    running_a.start(now).unwrap();
    assert!(
        stores
            .jobs
            .compare_and_swap(&running_a, JobStatus::Queued)
            .await
            .unwrap()
    );
    assert!(
        !stores
            .jobs
            .compare_and_swap(&running_a, JobStatus::Queued)
            .await
            .unwrap(),
        "stale expectation loses"
    );
    let mut running_b = b.clone();
    running_b.start(now).unwrap();
    assert!(
        !stores
            .jobs
            .compare_and_swap(&running_b, JobStatus::Queued)
            .await
            .unwrap(),
        "second RUNNING job of the same mode is refused"
    );
    assert_eq!(
        stores.jobs.count_by_status(JobStatus::Running).await.unwrap(),
        1
    );

    let mut done = running_a.clone();
    done.complete(
        now,
        JobUsage {
            cost_usd: Some(0.75),
            input_tokens: Some(900),
            output_tokens: Some(120),
        },
        1,
    )
    .unwrap();
    assert!(
        stores
            .jobs
            .compare_and_swap(&done, JobStatus::Running)
            .await
            .unwrap()
    );
    assert_eq!(stores.jobs.get(a.id).await.unwrap(), Some(done));

    // Fingerprints: duplicate hits, expiry replacement, purge.
    let expires = Some(now + Duration::hours(1));
    let first = stores.fingerprints.observe("abc", now, expires).await.unwrap();
    assert!(matches!(first, FingerprintObservation::Fresh(_)));
    let second = stores
        .fingerprints
        .observe("abc", now + Duration::minutes(5), expires)
        .await
        .unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.record().hit_count, 2);

    let later = now + Duration::hours(2);
    let replaced = stores
        .fingerprints
        .observe("abc", later, Some(later + Duration::hours(1)))
        .await
        .unwrap();
    assert!(matches!(replaced, FingerprintObservation::Fresh(_)));
    assert_eq!(replaced.record().hit_count, 1);
    assert_eq!(
        stores
            .fingerprints
            .purge_expired(later + Duration::hours(3))
            .await
            .unwrap(),
        1
    );

    // Budgets: limits, charges, once-a-day reset.
    stores.budgets.upsert_limits("default", 50.0, 1_000.0).await.unwrap();
    let charged = stores.budgets.charge("default", 12.5).await.unwrap();
    assert_eq!(charged.map(|b| b.used_today), Some(12.5));
    assert_eq!(stores.budgets.charge("missing", 1.0).await.unwrap(), None);
    let kept = stores
        .budgets
        .upsert_limits("default", 60.0, 1_000.0)
        .await
        .unwrap();
    assert_eq!(kept.used_today, 12.5);
    assert_eq!(kept.daily_budget, 60.0);
    assert_eq!(
        stores.budgets.reset_daily(now).await.unwrap(),
        vec!["default".to_string()]
    );
    assert!(stores.budgets.reset_daily(now).await.unwrap().is_empty());

    // State row.
    assert_eq!(stores.state.load().await.unwrap(), None);
    let mut state = stores
        .state
        .init_if_absent(OrchestratorState::new(false, now))
        .await
        .unwrap();
    state.stamp_run(ResearchMode::FullSpectrum, now);
    state.raise_backpressure(ResearchMode::SentimentBurst);
    state.provider_quota_json = json!({ "default": { "usedToday": 12.5 } });
    stores.state.save(&state).await.unwrap();
    let again = stores
        .state
        .init_if_absent(OrchestratorState::new(true, now))
        .await
        .unwrap();
    assert_eq!(again, state, "existing row wins");

    // Lease lock.
    let ttl = Duration::seconds(15);
    let lease = stores
        .lock
        .try_acquire("orch", "a", ttl, now)
        .await
        .unwrap()
        .expect("free lock");
    assert!(
        stores
            .lock
            .try_acquire("orch", "b", ttl, now + Duration::seconds(5))
            .await
            .unwrap()
            .is_none()
    );
    let taken = stores
        .lock
        .try_acquire("orch", "b", ttl, now + Duration::seconds(16))
        .await
        .unwrap()
        .expect("expired lease is taken over");
    stores.lock.release(&lease).await.unwrap();
    assert!(
        stores
            .lock
            .try_acquire("orch", "c", ttl, now + Duration::seconds(17))
            .await
            .unwrap()
            .is_none(),
        "a stale token cannot release the new holder"
    );
    stores.lock.release(&taken).await.unwrap();

    // Candidate outbox.
    let sink = PostgresCandidateSink::new(pool.clone());
    let batch = CandidateBatch {
        job_id: a.id,
        mode: a.mode,
        candidates: vec![AcceptedCandidate {
            candidate_id: CandidateId::new(),
            fingerprint_hash: "abc".to_string(),
            candidate: StrategyCandidate {
                name: "Alpha".to_string(),
                archetype_name: "breakout".to_string(),
                hypothesis: "ranges resolve upward".to_string(),
                rules_json: json!({ "entry": "close > high_20" }),
            },
        }],
        produced_at: now,
    };
    sink.submit(batch.clone()).await.unwrap();
    sink.submit(batch).await.unwrap();
    let stored: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM research_candidates")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored, 1, "resubmission is idempotent");
}
