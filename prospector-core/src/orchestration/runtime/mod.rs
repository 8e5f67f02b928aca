//! Process-level wiring: the event bus and the supervisor that drives the
//! orchestrator's background loops and in-flight research jobs.

mod event_bus;
mod supervisor;

pub use event_bus::*;
pub use supervisor::*;
