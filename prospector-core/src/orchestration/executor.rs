//! Port to the external research executor that performs the LLM-backed
//! research and returns strategy candidates.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use prospector_model::{
    JobId, ResearchDiagnostics, ResearchMode, StrategyCandidate,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One executor call. A full-spectrum job issues one request per sub-mode.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    pub job_id: JobId,
    pub mode: ResearchMode,
    pub context_json: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResearchOutput {
    pub candidates: Vec<StrategyCandidate>,
    pub diagnostics: ResearchDiagnostics,
}

/// Every variant is handled identically by the orchestrator: the job fails
/// and the retry policy applies. Variants only sharpen the audit message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("executor transport failed: {0}")]
    Transport(String),

    #[error("executor rejected the request: {0}")]
    Rejected(String),

    #[error("executor returned malformed output: {0}")]
    Malformed(String),

    #[error("executor timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResearchExecutor: Send + Sync + fmt::Debug {
    async fn execute(
        &self,
        request: ResearchRequest,
    ) -> Result<ResearchOutput, ExecutorError>;
}
