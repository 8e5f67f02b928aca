//! Distributed mutual exclusion for the orchestrator's critical sections.
//!
//! A lease is a row keyed by a fixed name, owned by a holder until
//! `expires_at`. Acquisition only succeeds when no row exists or the current
//! one has expired, so a crashed holder can never wedge other instances for
//! longer than one lease.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;

/// Proof of ownership returned by a successful acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockLease {
    pub name: String,
    pub holder: String,
    /// Distinguishes two acquisitions by the same holder.
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrchestratorLock: Send + Sync + fmt::Debug {
    /// `None` when another holder owns an unexpired lease.
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<LockLease>>;

    /// Idempotent. Only removes the lease if `lease.token` still owns it.
    async fn release(&self, lease: &LockLease) -> Result<()>;
}

/// Process-local lock table for tests and single-instance deployments.
#[derive(Default)]
pub struct InMemoryLock {
    leases: Mutex<HashMap<String, LockLease>>,
}

impl fmt::Debug for InMemoryLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryLock");
        match self.leases.try_lock() {
            Ok(leases) => {
                debug.field("held", &leases.len());
            }
            Err(_) => {
                debug.field("leases", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn holder(&self, name: &str) -> Option<LockLease> {
        self.leases.lock().await.get(name).cloned()
    }
}

#[async_trait]
impl OrchestratorLock for InMemoryLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<LockLease>> {
        let mut leases = self.leases.lock().await;
        if let Some(current) = leases.get(name)
            && current.expires_at >= now
        {
            return Ok(None);
        }
        let lease = LockLease {
            name: name.to_string(),
            holder: holder.to_string(),
            token: Uuid::now_v7(),
            expires_at: now + ttl,
        };
        leases.insert(name.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if leases
            .get(&lease.name)
            .is_some_and(|current| current.token == lease.token)
        {
            leases.remove(&lease.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn second_holder_waits_for_expiry() {
        let lock = InMemoryLock::new();
        let ttl = Duration::seconds(15);
        let a = lock
            .try_acquire("orch", "a", ttl, now())
            .await
            .unwrap()
            .expect("free lock");
        assert!(
            lock.try_acquire("orch", "b", ttl, now() + Duration::seconds(5))
                .await
                .unwrap()
                .is_none()
        );
        let b = lock
            .try_acquire("orch", "b", ttl, now() + Duration::seconds(16))
            .await
            .unwrap()
            .expect("expired lease is taken over");
        assert_ne!(a.token, b.token);

        // The stale holder's release must not drop the new owner's lease.
        lock.release(&a).await.unwrap();
        assert_eq!(lock.holder("orch").await, Some(b.clone()));

        lock.release(&b).await.unwrap();
        lock.release(&b).await.unwrap();
        assert_eq!(lock.holder("orch").await, None);
    }
}
