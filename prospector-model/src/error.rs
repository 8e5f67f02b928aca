use std::fmt::{self, Display};

use crate::job::JobStatus;

/// Errors produced by model parsing and lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A persisted enumeration held a value this build does not know.
    UnknownVariant { kind: &'static str, value: String },
    /// The lifecycle graph has no edge between the two states.
    InvalidTransition { from: JobStatus, to: JobStatus },
    /// A failed job asked for a retry after exhausting `max_retries`.
    RetriesExhausted { retry_count: u32, max_retries: u32 },
    /// Cost figures must be finite and non-negative.
    InvalidCost(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownVariant { kind, value } => {
                write!(f, "unknown {kind}: {value}")
            }
            ModelError::InvalidTransition { from, to } => {
                write!(f, "invalid job transition {from} -> {to}")
            }
            ModelError::RetriesExhausted {
                retry_count,
                max_retries,
            } => write!(
                f,
                "retries exhausted ({retry_count} of {max_retries} used)"
            ),
            ModelError::InvalidCost(msg) => write!(f, "invalid cost: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
