//! Research orchestration: pure scheduling and budget policy, the
//! deduplicator, the lease lock, the dispatcher and the service tying them
//! together under the lock.

pub mod budget;
pub mod clock;
pub mod config;
pub mod context;
pub mod dedup;
pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod lock;
pub mod orchestrator;
pub mod runtime;
pub mod scheduler;
pub mod sink;

pub use budget::{Admission, REASON_BUDGET_EXCEEDED};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use context::{MarketRegimeSource, StaticRegime};
pub use dedup::{
    AcceptedCandidate, Deduplicator, DuplicateCandidate, ScreenResult,
    fingerprint,
};
pub use dispatcher::{ExecutionOutcome, ResearchDispatcher};
pub use events::*;
pub use executor::{
    ExecutorError, ResearchExecutor, ResearchOutput, ResearchRequest,
};
pub use lock::{InMemoryLock, LockLease, OrchestratorLock};
pub use orchestrator::*;
pub use scheduler::{ModeEligibility, ModeGate};
pub use sink::{CandidateBatch, CandidateSink, InMemoryCandidateSink};
