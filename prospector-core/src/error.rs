use prospector_model::{JobStatus, ModelError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Orchestrator lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn invalid_transition(from: JobStatus, to: JobStatus) -> Self {
        OrchestratorError::Model(ModelError::InvalidTransition { from, to })
    }

    /// Failures that may clear up on their own, such as a held lease or a
    /// dropped database connection.
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::LockUnavailable(_) => true,
            #[cfg(feature = "database")]
            OrchestratorError::Database(_) => true,
            _ => false,
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Model(ModelError::InvalidTransition { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
