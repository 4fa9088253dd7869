//! Per-domain run lease.
//!
//! A [`RunLease`] is taken before any work starts and held for the whole run.
//! A background heartbeat pushes the expiry forward every `ttl / 3`, so a
//! crashed process stops renewing and its lease lapses on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::storage::{CheckpointStore, LeaseAcquisition};

/// Held run lease for one domain. Call [`RunLease::release`] when done;
/// dropping it only stops the heartbeat and lets the lease expire.
pub struct RunLease {
    store: Arc<dyn CheckpointStore>,
    domain_id: String,
    holder: String,
    lost: Arc<AtomicBool>,
    heartbeat: Option<JoinHandle<()>>,
}

impl RunLease {
    /// Take the lease for `domain_id` as `holder`.
    ///
    /// # Errors
    ///
    /// `ConcurrentRunConflict` when another holder owns an unexpired lease,
    /// `Persistence` when the store fails.
    pub async fn acquire(
        store: Arc<dyn CheckpointStore>,
        domain_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<Self, PipelineError> {
        match store.acquire_lease(domain_id, holder, ttl).await? {
            LeaseAcquisition::Acquired => {}
            LeaseAcquisition::Held {
                holder: current,
                expires_at_ms,
            } => {
                tracing::warn!(
                    domain_id = %domain_id,
                    holder = %current,
                    expires_at_ms = expires_at_ms,
                    "Run lease already held"
                );
                return Err(PipelineError::ConcurrentRunConflict {
                    domain_id: domain_id.to_string(),
                    holder: current,
                });
            }
        }

        tracing::debug!(domain_id = %domain_id, holder = %holder, "Run lease acquired");

        let lost = Arc::new(AtomicBool::new(false));
        let heartbeat = spawn_heartbeat(
            store.clone(),
            domain_id.to_string(),
            holder.to_string(),
            ttl,
            lost.clone(),
        );

        Ok(Self {
            store,
            domain_id: domain_id.to_string(),
            holder: holder.to_string(),
            lost,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// True if a heartbeat found the lease taken over or gone.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }

    /// Stop the heartbeat and delete the lease row.
    pub async fn release(mut self) -> Result<(), PipelineError> {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        self.store
            .release_lease(&self.domain_id, &self.holder)
            .await?;
        tracing::debug!(domain_id = %self.domain_id, holder = %self.holder, "Run lease released");
        Ok(())
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

fn spawn_heartbeat(
    store: Arc<dyn CheckpointStore>,
    domain_id: String,
    holder: String,
    ttl: Duration,
    lost: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let period = (ttl / 3).max(Duration::from_millis(100));

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        tick.tick().await; // skip the immediate first tick

        loop {
            tick.tick().await;
            match store.renew_lease(&domain_id, &holder, ttl).await {
                Ok(true) => {
                    tracing::trace!(domain_id = %domain_id, "Run lease renewed");
                }
                Ok(false) => {
                    tracing::warn!(
                        domain_id = %domain_id,
                        holder = %holder,
                        "Run lease lost, heartbeat stopped"
                    );
                    lost.store(true, Ordering::Relaxed);
                    break;
                }
                Err(e) => {
                    // Keep trying; the lease only lapses after a full ttl.
                    tracing::warn!(domain_id = %domain_id, error = %e, "Run lease renewal failed");
                }
            }
        }
    })
}
