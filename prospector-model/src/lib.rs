//! Record shapes shared across Prospector crates.
//!
//! Every type here mirrors a durable row read directly by budget dashboards
//! and job-history views, so field sets and nullability are part of the
//! contract. Behaviour is limited to pure transitions over these records.
#![allow(missing_docs)]

pub mod budget;
pub mod candidate;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod job;
pub mod mode;
pub mod state;

pub use budget::LlmBudget;
pub use candidate::{ResearchDiagnostics, StrategyCandidate};
pub use error::{ModelError, Result as ModelResult};
pub use fingerprint::CandidateFingerprint;
pub use ids::{CandidateId, JobId};
pub use job::{JobStatus, JobUsage, NewResearchJob, ResearchJob};
pub use mode::{CostClass, ResearchMode};
pub use state::{ORCHESTRATOR_STATE_ID, OrchestratorState};
