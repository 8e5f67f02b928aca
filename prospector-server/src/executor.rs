//! HTTP adapter for the research executor port.
//!
//! The executor is a separate service. Each call POSTs the request as
//! `{jobId, mode, contextJson}` and expects
//! `{candidates: [...], diagnostics: {...}}` back. Any non-2xx status is a
//! rejection; the orchestrator treats every error the same way.

use std::time::Duration;

use async_trait::async_trait;
use prospector_core::orchestration::{
    ExecutorError, ResearchExecutor, ResearchOutput, ResearchRequest,
};
use prospector_model::{ResearchDiagnostics, StrategyCandidate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecutorResponse {
    candidates: Vec<StrategyCandidate>,
    diagnostics: ResearchDiagnostics,
}

#[derive(Clone)]
pub struct HttpResearchExecutor {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl std::fmt::Debug for HttpResearchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResearchExecutor")
            .field("endpoint", &self.endpoint.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl HttpResearchExecutor {
    /// The overall call deadline is enforced by the dispatcher; only the
    /// connect phase is bounded here.
    pub fn new(
        endpoint: Url,
        token: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("prospector/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ResearchExecutor for HttpResearchExecutor {
    async fn execute(
        &self,
        request: ResearchRequest,
    ) -> Result<ResearchOutput, ExecutorError> {
        let mut call = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }
        let response = call
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        debug!(
            target: "research::dispatch",
            job_id = %request.job_id,
            mode = %request.mode,
            status = status.as_u16(),
            bytes = body.len(),
            "executor responded"
        );
        interpret(status, &body)
    }
}

fn interpret(
    status: StatusCode,
    body: &str,
) -> Result<ResearchOutput, ExecutorError> {
    if !status.is_success() {
        return Err(ExecutorError::Rejected(format!(
            "{status}: {}",
            error_message(body)
        )));
    }
    let parsed: ExecutorResponse = serde_json::from_str(body)
        .map_err(|e| ExecutorError::Malformed(e.to_string()))?;
    Ok(ResearchOutput {
        candidates: parsed.candidates,
        diagnostics: parsed.diagnostics,
    })
}

/// Prefer a JSON `error` or `message` field, else the raw body, clipped.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["error", "message"]
            .iter()
            .find_map(|key| v.get(*key)?.as_str().map(str::to_string))
    });
    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return "empty response body".to_string();
    }
    match message.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}…", &message[..cut]),
        None => message,
    }
}
