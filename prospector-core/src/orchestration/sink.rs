//! Hand-off of de-duplicated candidates to the downstream review pipeline.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prospector_model::{JobId, ResearchMode};
use tokio::sync::Mutex;

use super::dedup::AcceptedCandidate;
use crate::error::{OrchestratorError, Result};

/// Everything one job produced that survived de-duplication.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateBatch {
    pub job_id: JobId,
    pub mode: ResearchMode,
    pub candidates: Vec<AcceptedCandidate>,
    pub produced_at: DateTime<Utc>,
}

/// A failed submit is logged and never changes the job's outcome, but the
/// batch's ideas are not recorded as seen.
#[async_trait]
pub trait CandidateSink: Send + Sync + fmt::Debug {
    async fn submit(&self, batch: CandidateBatch) -> Result<()>;
}

/// Collects batches in memory. Can be switched to reject submissions.
#[derive(Default)]
pub struct InMemoryCandidateSink {
    batches: Mutex<Vec<CandidateBatch>>,
    rejecting: AtomicBool,
}

impl fmt::Debug for InMemoryCandidateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryCandidateSink");
        match self.batches.try_lock() {
            Ok(batches) => {
                debug.field("batches", &batches.len());
            }
            Err(_) => {
                debug.field("batches", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryCandidateSink {
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub async fn batches(&self) -> Vec<CandidateBatch> {
        self.batches.lock().await.clone()
    }

    pub async fn candidate_count(&self) -> usize {
        self.batches
            .lock()
            .await
            .iter()
            .map(|b| b.candidates.len())
            .sum()
    }
}

#[async_trait]
impl CandidateSink for InMemoryCandidateSink {
    async fn submit(&self, batch: CandidateBatch) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Internal(
                "candidate sink is rejecting batches".into(),
            ));
        }
        self.batches.lock().await.push(batch);
        Ok(())
    }
}
