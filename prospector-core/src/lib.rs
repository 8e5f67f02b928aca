//! # Prospector Core
//!
//! The autonomous research orchestrator: decides on a recurring cadence
//! whether to launch an AI research job, governs provider spend, caps
//! concurrency, and suppresses previously seen strategy candidates.
//!
//! ## Layout
//!
//! - [`orchestration`]: clock, mode policy, scheduler, budget guard,
//!   deduplicator, lease lock, dispatcher, the [`ResearchOrchestrator`]
//!   service and its runtime supervisor.
//! - [`persistence`]: storage ports implemented in memory and (with the
//!   `database` feature) on Postgres.
//!
//! ## Feature Flags
//!
//! - `database` (default): Postgres stores via SQLx plus the embedded
//!   [`MIGRATOR`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use prospector_core::{
//!     orchestration::{
//!         OrchestratorConfig, ResearchOrchestrator, SystemClock, TickOutcome,
//!         runtime::InProcEventBus, sink::InMemoryCandidateSink,
//!     },
//!     persistence::memory::in_memory_stores,
//! };
//!
//! async fn one_tick() -> prospector_core::error::Result<()> {
//!     let orchestrator = ResearchOrchestrator::new(
//!         OrchestratorConfig::default(),
//!         in_memory_stores(),
//!         Arc::new(SystemClock),
//!         Arc::new(InProcEventBus::new(64)),
//!         Arc::new(InMemoryCandidateSink::default()),
//!     )?;
//!     orchestrator.bootstrap().await?;
//!     if let TickOutcome::Launched { job, .. } = orchestrator.tick().await? {
//!         println!("launched {} ({})", job.id, job.mode);
//!     }
//!     Ok(())
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod error;
pub mod orchestration;
pub mod persistence;

pub use orchestration::ResearchOrchestrator;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
