//! Process host for the Prospector research orchestrator.
//!
//! Wires the Postgres stores, the in-process event bus and the HTTP
//! research executor into an [`OrchestratorRuntime`] and exposes the
//! operator commands used by the `prospector` binary.
//!
//! [`OrchestratorRuntime`]: prospector_core::orchestration::runtime::OrchestratorRuntime

pub mod app;
pub mod executor;

pub use app::{AppContext, connect_database};
pub use executor::HttpResearchExecutor;
