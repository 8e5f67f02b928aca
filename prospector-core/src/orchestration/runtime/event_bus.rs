use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::orchestration::events::{EventPublisher, OrchestratorEvent};

/// In-process fan-out of orchestrator events. Slow subscribers lag and
/// lose the oldest events; publishing never blocks or fails.
pub struct InProcEventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for InProcEventBus {
    async fn publish(&self, event: OrchestratorEvent) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}
